//! Rejects transcripts that carry no customer information.

use crate::config::{ConfigError, QualityConfig};
use crate::error::AppError;

use regex::Regex;
use serde::Deserialize;
use std::path::Path;

/// Default junk table. Replace it with `QUALITY_PATTERNS_FILE` to tune for a business.
const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    ("voicemail_prompt", r"(?i)^(so|the|fast|pickup|we|ask|you|to|let|thank)\s+"),
    ("system_prompt", r"(?i)^(press|dial|your|call|is|please|wait|hold|enter)\s+"),
    ("greeting_only", r"(?i)^(hello|hi|hey|goodbye|bye)\s*$"),
    ("single_word", r"(?i)^(yes|no|ok|sure|yeah|maybe|probably|possibly)\s*$"),
    ("filler_opener", r"(?i)^(um|uh|ah|er|hmm|well)\s+"),
    ("numbers_only", r"(?i)^(one|two|three|four|five|six|seven|eight|nine|zero)[\s\d]*$"),
    ("voicemail_system", r"(?i)voicemail|mailbox|beep|tone|message|unavailable|busy"),
    ("system_phrase", r"(?i)not available|please try|call back|after the"),
    ("fast_pickup", r"(?i)in case of.*pickup.*we ask.*let.*know|fast pickup.*we ask"),
];

#[derive(Debug, Deserialize)]
struct PatternEntry {
    name: String,
    pattern: String,
}

#[derive(Debug, Clone)]
pub struct JunkPattern {
    pub name: String,
    regex: Regex,
}

impl JunkPattern {
    pub fn new(name: &str, pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern)
            .map_err(|e| ConfigError::Patterns(format!("{name}: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct QualityFilter {
    min_chars: usize,
    patterns: Vec<JunkPattern>,
}

impl QualityFilter {
    pub fn new(min_chars: usize, patterns: Vec<JunkPattern>) -> Self {
        Self {
            min_chars,
            patterns,
        }
    }

    pub fn with_defaults(min_chars: usize) -> Self {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .filter_map(|(name, pattern)| JunkPattern::new(name, pattern).ok())
            .collect();
        Self::new(min_chars, patterns)
    }

    pub fn from_config(config: &QualityConfig) -> Result<Self, ConfigError> {
        match &config.patterns_file {
            Some(path) => Ok(Self::new(config.min_chars, load_patterns(path)?)),
            None => Ok(Self::with_defaults(config.min_chars)),
        }
    }

    /// Decide whether `transcript` is worth extracting from.
    ///
    /// Rejections carry the reason (`transcript_too_short` / `junk_transcript`) and, for junk,
    /// the matching pattern.
    pub fn check(&self, transcript: &str, voicemail_flag: bool) -> Result<(), AppError> {
        let trimmed = transcript.trim();
        if trimmed.chars().count() < self.min_chars {
            return Err(AppError::QualityRejection {
                reason: "transcript_too_short",
                pattern: None,
            });
        }
        if voicemail_flag {
            return Err(AppError::QualityRejection {
                reason: "junk_transcript",
                pattern: Some("voicemail_flag".to_string()),
            });
        }
        if let Some(hit) = self.patterns.iter().find(|p| p.regex.is_match(trimmed)) {
            return Err(AppError::QualityRejection {
                reason: "junk_transcript",
                pattern: Some(hit.name.clone()),
            });
        }
        Ok(())
    }
}

fn load_patterns(path: &Path) -> Result<Vec<JunkPattern>, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Patterns(format!("{}: {e}", path.display())))?;
    let entries: Vec<PatternEntry> =
        serde_json::from_str(&raw).map_err(|e| ConfigError::Patterns(e.to_string()))?;
    entries
        .iter()
        .map(|e| JunkPattern::new(&e.name, &e.pattern))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rejection(result: Result<(), AppError>) -> (&'static str, Option<String>) {
        match result {
            Err(AppError::QualityRejection { reason, pattern }) => (reason, pattern),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn short_transcripts_are_rejected_before_patterns() {
        let filter = QualityFilter::with_defaults(15);
        let (reason, pattern) = rejection(filter.check("  hello there ", false));
        assert_eq!(reason, "transcript_too_short");
        assert_eq!(pattern, None);
        assert_eq!(rejection(filter.check("", false)).0, "transcript_too_short");
    }

    #[test]
    fn junk_patterns_report_their_name() {
        let filter = QualityFilter::with_defaults(15);
        let (reason, pattern) = rejection(
            filter.check("Please leave a message after the tone", false),
        );
        assert_eq!(reason, "junk_transcript");
        assert_eq!(pattern.as_deref(), Some("system_prompt"));

        let (_, pattern) = rejection(filter.check("um so my car is making noise", false));
        assert_eq!(pattern.as_deref(), Some("filler_opener"));
    }

    #[test]
    fn upstream_voicemail_flag_is_junk() {
        let filter = QualityFilter::with_defaults(15);
        let (_, pattern) = rejection(filter.check("Hi this is John Smith calling", true));
        assert_eq!(pattern.as_deref(), Some("voicemail_flag"));
    }

    #[test]
    fn informative_transcript_passes() {
        let filter = QualityFilter::with_defaults(15);
        assert!(filter
            .check("Hi this is John Smith, my 2015 Ford F150 won't start", false)
            .is_ok());
    }

    #[test]
    fn patterns_file_replaces_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "shop_greeting", "pattern": "(?i)thanks for calling joe's garage"}}]"#
        )
        .unwrap();
        let filter = QualityFilter::from_config(&QualityConfig {
            min_chars: 15,
            patterns_file: Some(file.path().to_path_buf()),
        })
        .unwrap();
        let (_, pattern) = rejection(filter.check("Thanks for calling Joe's Garage, hold on", false));
        assert_eq!(pattern.as_deref(), Some("shop_greeting"));
        // default table no longer applies
        assert!(filter.check("um so my car is making noise", false).is_ok());
    }

    #[test]
    fn bad_pattern_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name": "broken", "pattern": "(unclosed"}}]"#).unwrap();
        let result = QualityFilter::from_config(&QualityConfig {
            min_chars: 15,
            patterns_file: Some(file.path().to_path_buf()),
        });
        assert!(matches!(result, Err(ConfigError::Patterns(_))));
    }
}
