use serde::{Deserialize, Serialize};

/// Container and codec defaults used when the final artifact is encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub container: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_bitrate: Option<String>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            container: "mp4".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            audio_bitrate: Some("128k".to_string()),
        }
    }
}

impl ExportSettings {
    /// Encoder arguments placed between the stream mapping and the output path.
    pub fn encoder_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
        ];
        if let Some(bitrate) = &self.audio_bitrate {
            args.push("-b:a".to_string());
            args.push(bitrate.clone());
        }
        args.push("-f".to_string());
        args.push(self.container.clone());
        args
    }
}
