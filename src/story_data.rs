//! Reference configuration compiled into the crate.

pub const STORY: &str = include_str!("../story_data/story.ron");
pub const SURFACES: &str = include_str!("../story_data/surfaces.ron");

pub const GEOLOGY_CODEBOOK: &str = include_str!("../story_data/geology/codebook.json");
pub const GEOLOGY_SAMPLE: &str = include_str!("../story_data/geology/sample.csv");

pub const BOTANY_CODEBOOK: &str = include_str!("../story_data/botany/codebook.json");
pub const BOTANY_SAMPLE: &str = include_str!("../story_data/botany/sample.csv");
