//! # Stage Skills
//!
//! The work each pipeline stage performs, and the external collaborators it
//! delegates to.
//!
//! ```text
//! StageAgent
//!   └── StageWorker (one skill per stage)
//!         └── Collaborator (ContentGenerator, PlaceVerifier, ItineraryArchive)
//! ```
//!
//! - `ResearchSkill` - destination research via the content generator
//! - `CurationSkill` - day-by-day plan via the content generator
//! - `ValidationSkill` - serial place verification
//! - `ResponseSkill` - final itinerary composition and archival

pub mod llm_helpers;
pub mod prompts;

// Typed stage results
pub mod artifact_registry;

// Collaborators
pub mod generator;
pub mod places;

// Stage workers
pub mod curation_skill;
pub mod research_skill;
pub mod response_skill;
pub mod validation_skill;

#[cfg(test)]
pub(crate) mod fakes;

pub use artifact_registry::{
    CurationResult, FinalItinerary, ResearchResult, ValidationResult, Verification,
};
pub use curation_skill::CurationSkill;
pub use generator::{generation_error, ContentGenerator, LlmContentGenerator, MalformedOutput};
pub use places::{GooglePlacesVerifier, PlaceVerifier, VerifiedPlace};
pub use research_skill::ResearchSkill;
pub use response_skill::ResponseSkill;
pub use validation_skill::ValidationSkill;
