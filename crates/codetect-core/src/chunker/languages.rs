//! Per-language chunking configuration.
//!
//! Each supported language lists the AST node types that become chunks
//! (split nodes), the field names tried when extracting a symbol name,
//! and the maximum chunk size before the chunker recurses into children.

use crate::types::Language;

/// Chunking configuration for one language.
#[derive(Debug, Clone, Copy)]
pub struct LanguageSpec {
    /// Language this spec applies to.
    pub language: Language,
    /// AST node types that become chunks.
    pub split_nodes: &'static [&'static str],
    /// Field names tried, in order, to extract the symbol name.
    pub name_fields: &'static [&'static str],
    /// Maximum chunk content length in bytes before recursing.
    pub max_chunk_size: usize,
}

const DEFAULT_MAX_CHUNK_SIZE: usize = 3_000;

static PYTHON: LanguageSpec = LanguageSpec {
    language: Language::Python,
    split_nodes: &["function_definition", "class_definition", "decorated_definition"],
    name_fields: &["name"],
    max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
};

static TYPESCRIPT: LanguageSpec = LanguageSpec {
    language: Language::TypeScript,
    split_nodes: &[
        "function_declaration",
        "generator_function_declaration",
        "class_declaration",
        "abstract_class_declaration",
        "method_definition",
        "interface_declaration",
        "enum_declaration",
        "type_alias_declaration",
    ],
    name_fields: &["name"],
    max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
};

static JAVASCRIPT: LanguageSpec = LanguageSpec {
    language: Language::JavaScript,
    split_nodes: &[
        "function_declaration",
        "generator_function_declaration",
        "class_declaration",
        "method_definition",
    ],
    name_fields: &["name"],
    max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
};

static RUST: LanguageSpec = LanguageSpec {
    language: Language::Rust,
    split_nodes: &[
        "function_item",
        "struct_item",
        "enum_item",
        "trait_item",
        "impl_item",
        "mod_item",
        "macro_definition",
    ],
    name_fields: &["name", "type"],
    max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
};

static GO: LanguageSpec = LanguageSpec {
    language: Language::Go,
    split_nodes: &["function_declaration", "method_declaration", "type_declaration"],
    name_fields: &["name"],
    max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
};

static JAVA: LanguageSpec = LanguageSpec {
    language: Language::Java,
    split_nodes: &[
        "class_declaration",
        "interface_declaration",
        "enum_declaration",
        "method_declaration",
        "constructor_declaration",
    ],
    name_fields: &["name"],
    max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
};

static C: LanguageSpec = LanguageSpec {
    language: Language::C,
    split_nodes: &["function_definition", "struct_specifier", "enum_specifier", "type_definition"],
    name_fields: &["declarator", "name"],
    max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
};

static CPP: LanguageSpec = LanguageSpec {
    language: Language::Cpp,
    split_nodes: &[
        "function_definition",
        "class_specifier",
        "struct_specifier",
        "enum_specifier",
        "namespace_definition",
        "template_declaration",
    ],
    name_fields: &["declarator", "name"],
    max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
};

static CSHARP: LanguageSpec = LanguageSpec {
    language: Language::CSharp,
    split_nodes: &[
        "class_declaration",
        "interface_declaration",
        "struct_declaration",
        "enum_declaration",
        "method_declaration",
        "constructor_declaration",
    ],
    name_fields: &["name"],
    max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
};

static RUBY: LanguageSpec = LanguageSpec {
    language: Language::Ruby,
    split_nodes: &["method", "singleton_method", "class", "module"],
    name_fields: &["name"],
    max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
};

/// Chunking spec for a language, or `None` for unsupported languages
/// (which fall back to line windows).
pub fn spec_for(language: Language) -> Option<&'static LanguageSpec> {
    match language {
        Language::Python => Some(&PYTHON),
        Language::TypeScript => Some(&TYPESCRIPT),
        Language::JavaScript => Some(&JAVASCRIPT),
        Language::Rust => Some(&RUST),
        Language::Go => Some(&GO),
        Language::Java => Some(&JAVA),
        Language::C => Some(&C),
        Language::Cpp => Some(&CPP),
        Language::CSharp => Some(&CSHARP),
        Language::Ruby => Some(&RUBY),
        Language::Unknown => None,
    }
}

/// tree-sitter grammar for a language.
pub fn grammar_for(language: Language) -> Option<tree_sitter::Language> {
    match language {
        Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
        Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
        Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
        Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
        Language::Java => Some(tree_sitter_java::LANGUAGE.into()),
        Language::C => Some(tree_sitter_c::LANGUAGE.into()),
        Language::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
        Language::CSharp => Some(tree_sitter_c_sharp::LANGUAGE.into()),
        Language::Ruby => Some(tree_sitter_ruby::LANGUAGE.into()),
        Language::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_spec_language_has_a_grammar() {
        for lang in [
            Language::Python,
            Language::TypeScript,
            Language::JavaScript,
            Language::Rust,
            Language::Go,
            Language::Java,
            Language::C,
            Language::Cpp,
            Language::CSharp,
            Language::Ruby,
        ] {
            assert!(spec_for(lang).is_some(), "missing spec for {lang}");
            assert!(grammar_for(lang).is_some(), "missing grammar for {lang}");
        }
        assert!(spec_for(Language::Unknown).is_none());
        assert!(grammar_for(Language::Unknown).is_none());
    }

    #[test]
    fn test_spec_split_nodes_nonempty() {
        let spec = spec_for(Language::Rust).expect("rust spec");
        assert!(spec.split_nodes.contains(&"function_item"));
        assert!(spec.max_chunk_size > 0);
    }
}
