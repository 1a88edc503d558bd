use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding this crate's own Rust sources.
const SOURCE_DIRS: [&str; 4] = ["sensitivity", "cli", "tests", "benches"];

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

/// The source rules enforced at build time.
#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    ForbiddenWords,
    StarsInComment,
    AllCapsComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> String {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenWords => format!(r"(//|/\*|///).*(?:{})", FORBIDDEN_WORDS.join("|")),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::AllCapsComment => r"(//|/\*|///).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn explanation(self) -> String {
        match self {
            Rule::UnderscorePrefix => "Underscore-prefixed variable names are not allowed in this project.\n   Either use the variable (removing the underscore) or remove it completely.".to_string(),
            Rule::ForbiddenWords => format!(
                "Comments containing {} are STRICTLY FORBIDDEN in this project.\n   Remove them completely rather than commenting them out.",
                FORBIDDEN_WORDS.map(|w| format!("'{w}'")).join(", ")
            ),
            Rule::StarsInComment => "The '**' pattern is not allowed in regular comments (but is allowed in doc comments).".to_string(),
            Rule::AllCapsComment => "Comments where all alphabetic characters are uppercase are STRICTLY FORBIDDEN in this project.\n   STRONGLY CONSIDER deleting the comment completely.".to_string(),
            Rule::AllowDeadCode => "#[allow(dead_code)] attributes are STRICTLY FORBIDDEN in this project.\n   Either use the code (removing the attribute) or remove it completely.".to_string(),
        }
    }

    // Decides whether a line matched by the pattern is a real violation.
    fn is_violation(self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self {
            Rule::UnderscorePrefix => {
                let is_comment = trimmed.starts_with("//") || line.contains("/*");
                // Odd segments between quotes are string literal contents.
                let in_string = line
                    .split('"')
                    .enumerate()
                    .any(|(i, part)| i % 2 == 1 && part.contains('_'));
                !is_comment && !in_string
            }
            Rule::ForbiddenWords | Rule::AllowDeadCode => true,
            Rule::StarsInComment => !trimmed.starts_with("///"),
            Rule::AllCapsComment => {
                let Some(comment) = comment_text(line) else {
                    return false;
                };
                let mut letters = comment.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }
        }
    }
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        Some(rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        Some(rest.trim())
    } else {
        let idx = line.find("/*")?;
        let rest = &line[idx + 2..];
        Some(rest.find("*/").map_or(rest, |end| &rest[..end]).trim())
    }
}

// Collects every violating line of one file for a single error message.
struct ViolationCollector {
    rule: Rule,
    violations: Vec<String>,
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn crate_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn scan(rule: Rule, files: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();

    for path in files {
        let mut collector = ViolationCollector {
            rule,
            violations: Vec::new(),
        };
        searcher.search_path(&matcher, path, &mut collector)?;
        if !collector.violations.is_empty() {
            return Err(format_violations(path, &collector.violations, rule).into());
        }
    }
    Ok(())
}

fn format_violations(path: &Path, violations: &[String], rule: Rule) -> String {
    let mut error_msg = format!(
        "\n❌ ERROR: Found {} source policy violations in {}:\n",
        violations.len(),
        path.display()
    );
    for violation in violations {
        error_msg.push_str(&format!("   {violation}\n"));
    }
    error_msg.push_str(&format!("\n⚠️ {}\n", rule.explanation()));
    error_msg
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let files = crate_sources();
    for rule in [
        Rule::UnderscorePrefix,
        Rule::ForbiddenWords,
        Rule::StarsInComment,
        Rule::AllCapsComment,
        Rule::AllowDeadCode,
    ] {
        if let Err(e) = scan(rule, &files) {
            // Shown in cargo's output before the build fails.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
