use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnswerHunterError {
    #[error("Unknown setting: {0}")] UnknownSetting(String),
    #[error("Invalid message")] InvalidMessage,
    #[error("Invalid image")] InvalidImage,
}
impl AnswerHunterError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownSetting(_) => "CFG-1002",
            Self::InvalidMessage => "MSG-1001",
            Self::InvalidImage => "MSG-1002",
        }
    }
    pub fn explain(&self) -> &'static str {
        match self {
            Self::UnknownSetting(_) => "The key is not one of the recognised configuration keys.",
            Self::InvalidMessage => "The message has no recognised `action` or is missing fields.",
            Self::InvalidImage => "The image must be a base64 data URI (data:<mime>;base64,<data>).",
        }
    }
}
