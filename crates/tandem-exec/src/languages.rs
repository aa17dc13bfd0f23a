//! The closed language table: language → sandbox runtime + entry filename.

/// A resolved sandbox runtime for one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Runtime {
    pub language: &'static str,
    pub version: &'static str,
    /// The entry filename the sandbox expects for this language
    /// (some toolchains care: `Main.java` must match the class name).
    pub filename: &'static str,
}

/// The supported languages, pinned to the sandbox versions the editor
/// clients were tested against. A language outside this table is
/// `unsupported_language` — no sandbox call is made.
const LANGUAGES: &[Runtime] = &[
    Runtime { language: "javascript", version: "18.15.0", filename: "main.js" },
    Runtime { language: "python", version: "3.10.0", filename: "main.py" },
    Runtime { language: "java", version: "15.0.2", filename: "Main.java" },
    Runtime { language: "cpp", version: "10.2.0", filename: "main.cpp" },
    Runtime { language: "c", version: "10.2.0", filename: "main.c" },
    Runtime { language: "typescript", version: "5.0.3", filename: "main.ts" },
    Runtime { language: "php", version: "8.2.3", filename: "main.php" },
    Runtime { language: "ruby", version: "3.0.1", filename: "main.rb" },
    Runtime { language: "go", version: "1.16.2", filename: "main.go" },
    Runtime { language: "rust", version: "1.68.2", filename: "main.rs" },
    Runtime { language: "kotlin", version: "1.8.20", filename: "Main.kt" },
    Runtime { language: "swift", version: "5.3.3", filename: "main.swift" },
    Runtime { language: "csharp", version: "6.12.0", filename: "Main.cs" },
];

/// Fallback filename for anything that slips through without a mapping.
pub const DEFAULT_FILENAME: &str = "main.txt";

/// Resolves a language name (case-insensitive) to its runtime.
pub fn runtime_for(language: &str) -> Option<Runtime> {
    let needle = language.to_ascii_lowercase();
    LANGUAGES.iter().copied().find(|r| r.language == needle)
}

/// All supported language names, for error messages and listings.
pub fn supported_languages() -> Vec<&'static str> {
    LANGUAGES.iter().map(|r| r.language).collect()
}

// =========================================================================
// Tests
// =========================================================================
