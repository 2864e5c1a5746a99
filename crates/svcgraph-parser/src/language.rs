// ABOUTME: Defines the source languages available to the code scanner.
// ABOUTME: Maps file extensions to Tree-sitter grammars and builds configured parsers.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    Rust,
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Go,
    Java,
}

impl Language {
    pub fn name(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::TypeScript | Language::Tsx => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Go => "go",
            Language::Java => "java",
        }
    }

    /// Node kinds that represent a call site in this grammar.
    pub fn call_kinds(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["call"],
            Language::Java => &["method_invocation"],
            Language::Rust
            | Language::TypeScript
            | Language::Tsx
            | Language::JavaScript
            | Language::Go => &["call_expression"],
        }
    }

    /// Node kinds that hold a string literal in this grammar.
    pub fn string_kinds(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["string", "concatenated_string"],
            Language::JavaScript | Language::TypeScript | Language::Tsx => {
                &["string", "template_string"]
            }
            Language::Go => &["interpreted_string_literal", "raw_string_literal"],
            Language::Java => &["string_literal"],
            Language::Rust => &["string_literal", "raw_string_literal"],
        }
    }
}

pub struct LanguageConfig {
    pub language: tree_sitter::Language,
    pub file_extensions: Vec<&'static str>,
}

pub struct LanguageRegistry {
    configs: HashMap<Language, LanguageConfig>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageRegistry {
    pub fn new() -> Self {
        let mut configs = HashMap::new();

        configs.insert(
            Language::Rust,
            LanguageConfig {
                language: tree_sitter_rust::LANGUAGE.into(),
                file_extensions: vec!["rs"],
            },
        );

        configs.insert(
            Language::TypeScript,
            LanguageConfig {
                language: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
                file_extensions: vec!["ts", "mts", "cts"],
            },
        );

        configs.insert(
            Language::Tsx,
            LanguageConfig {
                language: tree_sitter_typescript::LANGUAGE_TSX.into(),
                file_extensions: vec!["tsx"],
            },
        );

        configs.insert(
            Language::JavaScript,
            LanguageConfig {
                language: tree_sitter_javascript::LANGUAGE.into(),
                file_extensions: vec!["js", "jsx", "mjs", "cjs"],
            },
        );

        configs.insert(
            Language::Python,
            LanguageConfig {
                language: tree_sitter_python::LANGUAGE.into(),
                file_extensions: vec!["py", "pyi"],
            },
        );

        configs.insert(
            Language::Go,
            LanguageConfig {
                language: tree_sitter_go::LANGUAGE.into(),
                file_extensions: vec!["go"],
            },
        );

        configs.insert(
            Language::Java,
            LanguageConfig {
                language: tree_sitter_java::LANGUAGE.into(),
                file_extensions: vec!["java"],
            },
        );

        Self { configs }
    }

    pub fn detect_language(&self, file_path: &Path) -> Option<Language> {
        let extension = file_path.extension()?.to_str()?;

        for (lang, config) in &self.configs {
            if config.file_extensions.contains(&extension) {
                return Some(*lang);
            }
        }

        None
    }

    pub fn get_config(&self, language: &Language) -> Option<&LanguageConfig> {
        self.configs.get(language)
    }

    pub fn create_parser(&self, language: &Language) -> Option<Parser> {
        let config = self.get_config(language)?;
        let mut parser = Parser::new();
        parser.set_language(&config.language).ok()?;
        Some(parser)
    }

    /// Languages selected by name (`"python"`, `"go"`, ...). Empty selects all.
    pub fn select(&self, names: &[String]) -> Vec<Language> {
        let mut selected: Vec<Language> = self
            .configs
            .keys()
            .copied()
            .filter(|lang| {
                names.is_empty()
                    || names.iter().any(|n| {
                        let n = n.to_lowercase();
                        n == lang.name() || (n == "ts" && lang.name() == "typescript")
                    })
            })
            .collect();
        selected.sort_by_key(|l| l.name());
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::{LANGUAGE_VERSION, MIN_COMPATIBLE_LANGUAGE_VERSION};

    #[test]
    fn registered_languages_use_supported_versions() {
        let registry = LanguageRegistry::new();
        for (language, config) in &registry.configs {
            let version = config.language.abi_version();
            assert!(
                (MIN_COMPATIBLE_LANGUAGE_VERSION..=LANGUAGE_VERSION).contains(&version),
                "Language {:?} uses incompatible Tree-sitter version {} (supported {}..={})",
                language,
                version,
                MIN_COMPATIBLE_LANGUAGE_VERSION,
                LANGUAGE_VERSION
            );
        }
    }

    #[test]
    fn detects_by_extension() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.detect_language(Path::new("a/b.py")), Some(Language::Python));
        assert_eq!(registry.detect_language(Path::new("web/App.tsx")), Some(Language::Tsx));
        assert_eq!(registry.detect_language(Path::new("README.md")), None);
    }

    #[test]
    fn select_filters_by_name() {
        let registry = LanguageRegistry::new();
        let langs = registry.select(&["typescript".to_string()]);
        assert_eq!(langs.len(), 2);
        assert_eq!(registry.select(&[]).len(), 7);
    }
}
