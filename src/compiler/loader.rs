use crate::dsl::Story;
use anyhow::{Result, Context as AnyhowContext};
use std::fs;

pub fn load_story_from_yaml(file_path: &str) -> Result<Story> {
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read YAML file from {}", file_path))?;

    load_story_from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize YAML content from {}", file_path))
}

pub fn load_story_from_str(yaml: &str) -> Result<Story> {
    let story: Story = serde_yaml::from_str(yaml)?;
    Ok(story)
}
