use super::role::Role;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextContent {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<Vec<Role>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    pub data: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<Vec<Role>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
/// A block of output produced by a tool
pub enum Content {
    Text(TextContent),
    Image(ImageContent),
}

impl Content {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Content::Text(TextContent {
            text: text.into(),
            audience: None,
            priority: None,
        })
    }

    pub fn image<S: Into<String>, T: Into<String>>(data: S, mime_type: T) -> Self {
        Content::Image(ImageContent {
            data: data.into(),
            mime_type: mime_type.into(),
            audience: None,
            priority: None,
        })
    }

    /// Get the text content if this is a TextContent variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    /// Set the audience for the content
    pub fn with_audience(mut self, audience: Vec<Role>) -> Self {
        match &mut self {
            Content::Text(text) => text.audience = Some(audience),
            Content::Image(image) => image.audience = Some(audience),
        }
        self
    }

    /// Set the priority for the content, clamped to 0.0..=1.0
    pub fn with_priority(mut self, priority: f32) -> Self {
        let priority = priority.clamp(0.0, 1.0);
        match &mut self {
            Content::Text(text) => text.priority = Some(priority),
            Content::Image(image) => image.priority = Some(priority),
        }
        self
    }

    pub fn audience(&self) -> Option<&Vec<Role>> {
        match self {
            Content::Text(text) => text.audience.as_ref(),
            Content::Image(image) => image.audience.as_ref(),
        }
    }

    /// True when the model is meant to see this block
    pub fn visible_to_assistant(&self) -> bool {
        self.audience()
            .map_or(true, |audience| audience.contains(&Role::Assistant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_wire_shape() -> anyhow::Result<()> {
        let content = Content::text("hello").with_audience(vec![Role::User]);
        assert_eq!(
            serde_json::to_value(&content)?,
            json!({"type": "text", "text": "hello", "audience": ["user"]})
        );

        let image: Content = serde_json::from_value(json!({
            "type": "image",
            "data": "aGk=",
            "mimeType": "image/png"
        }))?;
        assert_eq!(image, Content::image("aGk=", "image/png"));
        Ok(())
    }

    #[test]
    fn test_priority_is_clamped() {
        let clamped = |priority: f32| match Content::text("x").with_priority(priority) {
            Content::Text(text) => text.priority,
            Content::Image(image) => image.priority,
        };
        assert_eq!(clamped(3.0), Some(1.0));
        assert_eq!(clamped(-1.0), Some(0.0));
    }

    #[test]
    fn test_visible_to_assistant() {
        assert!(Content::text("x").visible_to_assistant());
        assert!(Content::text("x")
            .with_audience(vec![Role::User, Role::Assistant])
            .visible_to_assistant());
        assert!(!Content::text("x")
            .with_audience(vec![Role::User])
            .visible_to_assistant());
    }
}
