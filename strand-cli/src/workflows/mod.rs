//! Concrete workflows built from the core patterns

pub mod analysis;
pub mod books;
pub mod content;
pub mod questionnaire;
pub mod routing;
