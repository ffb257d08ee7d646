use regex::Regex;

use error::SubscribeError;

/// A compiled subscription pattern.
///
/// The two common forms never touch the regex machinery: a pattern with no
/// metacharacters matches one channel exactly, and a literal stem followed
/// by `.*` matches every channel starting with that stem. Anything else
/// compiles to a regular expression that is implicitly anchored with `^`
/// and `$`, so a pattern matches whole channel names only.
pub enum ChannelPattern {
    Literal(String),
    Prefix(String),
    Regex(Regex),
}
impl ChannelPattern {
    /// Compiles a pattern string.
    pub fn new(pattern: &str) -> Result<Self, SubscribeError> {
        if is_literal(pattern) {
            return Ok(ChannelPattern::Literal(pattern.into()));
        }

        if pattern.ends_with(".*") {
            let stem = &pattern[..pattern.len() - 2];
            if is_literal(stem) {
                return Ok(ChannelPattern::Prefix(stem.into()));
            }
        }

        let re = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(ChannelPattern::Regex(re))
    }

    /// Checks the pattern against a channel name. Matching is
    /// case-sensitive.
    pub fn matches(&self, channel: &str) -> bool {
        match *self {
            ChannelPattern::Literal(ref name) => name == channel,
            ChannelPattern::Prefix(ref stem) => channel.starts_with(stem),
            ChannelPattern::Regex(ref re) => re.is_match(channel),
        }
    }
}

fn is_literal(pattern: &str) -> bool {
    !pattern
        .bytes()
        .any(|b| b".^$*+?()[]{}|\\".contains(&b))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn literals_match_exactly() {
        let pattern = ChannelPattern::new("POSE").unwrap();
        assert!(match pattern {
            ChannelPattern::Literal(_) => true,
            _ => false,
        });
        assert!(pattern.matches("POSE"));
        assert!(!pattern.matches("POSE_BODY"));
        assert!(!pattern.matches("POS"));
        assert!(!pattern.matches("pose"));
    }

    #[test]
    fn trailing_wildcard_matches_prefixes() {
        let pattern = ChannelPattern::new("A.*").unwrap();
        assert!(match pattern {
            ChannelPattern::Prefix(_) => true,
            _ => false,
        });
        assert!(pattern.matches("ABC"));
        assert!(pattern.matches("ADE"));
        assert!(pattern.matches("A"));
        assert!(!pattern.matches("B"));
        assert!(!pattern.matches("BA"));
    }

    #[test]
    fn regexes_are_anchored() {
        let pattern = ChannelPattern::new("CAM_(LEFT|RIGHT)").unwrap();
        assert!(match pattern {
            ChannelPattern::Regex(_) => true,
            _ => false,
        });
        assert!(pattern.matches("CAM_LEFT"));
        assert!(pattern.matches("CAM_RIGHT"));
        assert!(!pattern.matches("CAM_LEFT_RAW"));
        assert!(!pattern.matches("XCAM_LEFT"));
    }

    #[test]
    fn invalid_regexes_are_reported() {
        assert!(ChannelPattern::new("CAM_(").is_err());
    }

    #[test]
    fn empty_pattern_only_matches_empty() {
        let pattern = ChannelPattern::new("").unwrap();
        assert!(pattern.matches(""));
        assert!(!pattern.matches("A"));
    }
}
