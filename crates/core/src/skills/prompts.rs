//! System prompts for the content-generation calls, bundled at compile time.

/// Destination research: overview, neighborhoods, candidate places, tips
pub const RESEARCH: &str = include_str!("defaults/research.md");

/// Day-by-day curation from the research result
pub const CURATION: &str = include_str!("defaults/curation.md");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_are_bundled() {
        assert!(RESEARCH.contains("candidate_places"));
        assert!(CURATION.contains("time_slot"));
    }
}
