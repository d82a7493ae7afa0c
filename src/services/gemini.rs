use std::future::Future;

use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::session::types::{Language, MeditationScript};

use super::{segment_count_for_duration, Generate, GenerationError};

const SCRIPT_MODEL: &str = "gemini-2.5-flash";
const SPEECH_MODEL: &str = "gemini-2.5-flash-preview-tts";
const IMAGE_MODEL: &str = "imagen-4.0-generate-001";
const VOICE_NAME: &str = "Kore";

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn post(&self, model: &str, action: &str, body: Value) -> Result<Value, GenerationError> {
        let url = format!("{}/v1beta/models/{model}:{action}", self.base_url);
        debug!(%model, %action, "generation request");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}

/// Response schema the script model is asked to conform to.
fn script_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "title": {
                "type": "STRING",
                "description": "A short, calming title for the meditation session."
            },
            "main_visual_prompt": {
                "type": "STRING",
                "description": "A single, detailed prompt for an image generator to create one serene, beautiful, photorealistic image that represents the entire mood of the meditation session."
            },
            "segments": {
                "type": "ARRAY",
                "description": "An array of meditation segments, each with a spoken paragraph.",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "paragraph": {
                            "type": "STRING",
                            "description": "The text to be spoken by the narrator for this segment. Should be 2-3 sentences long."
                        }
                    },
                    "required": ["paragraph"]
                }
            }
        },
        "required": ["title", "main_visual_prompt", "segments"]
    })
}

/// Pulls `candidates[0].content.parts[0]` out of a generateContent
/// response.
fn first_part(response: &Value) -> Option<&Value> {
    response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)
}

impl Generate for GeminiClient {
    fn script(
        &self,
        prompt: &str,
        language: Language,
        duration_minutes: u32,
    ) -> impl Future<Output = Result<MeditationScript, GenerationError>> + Send {
        async move {
            let segment_count = segment_count_for_duration(duration_minutes);
            let instructions = format!(
                "Generate a deeply meaningful and unique guided meditation script based on this prompt: \"{prompt}\".\n\
                 The script should be in {language}.\n\
                 Avoid common clichés and ensure the narrative is creative, profound, and not a copy of existing meditations.\n\
                 It must be structured into a title, a single main visual prompt for an image generator, and exactly {segment_count} distinct segments.\n\
                 Each segment must have a paragraph of text to be spoken. The total spoken time should be approximately {duration_minutes} minute(s)."
            );

            let body = json!({
                "contents": [{ "parts": [{ "text": instructions }] }],
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "responseSchema": script_schema(),
                }
            });

            let response = self.post(SCRIPT_MODEL, "generateContent", body).await?;
            let text = first_part(&response)
                .and_then(|part| part.get("text"))
                .and_then(Value::as_str)
                .ok_or(GenerationError::MissingField("candidates[0].content.parts[0].text"))?;

            Ok(serde_json::from_str(text.trim())?)
        }
    }

    fn image(
        &self,
        visual_prompt: &str,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send {
        async move {
            let body = json!({
                "instances": [{
                    "prompt": format!(
                        "Create a serene, beautiful, photorealistic image for a meditation app. \
                         The image should be visually stunning and calming. Prompt: {visual_prompt}"
                    )
                }],
                "parameters": {
                    "sampleCount": 1,
                    "aspectRatio": "16:9",
                    "outputMimeType": "image/jpeg",
                }
            });

            let response = self.post(IMAGE_MODEL, "predict", body).await?;
            let data = response
                .get("predictions")
                .and_then(|p| p.get(0))
                .and_then(|p| p.get("bytesBase64Encoded"))
                .and_then(Value::as_str)
                .ok_or(GenerationError::MissingField("predictions[0].bytesBase64Encoded"))?;

            Ok(data.to_string())
        }
    }

    fn speech(
        &self,
        paragraph: &str,
        language: Language,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send {
        async move {
            let prompt = match language {
                Language::Urdu => {
                    format!("Translate this to Urdu and then generate audio: \"{paragraph}\"")
                }
                Language::English => {
                    format!("Say this with a calm, soothing voice: \"{paragraph}\"")
                }
            };

            let body = json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": VOICE_NAME }
                        }
                    }
                }
            });

            let response = self.post(SPEECH_MODEL, "generateContent", body).await?;
            let data = first_part(&response)
                .and_then(|part| part.get("inlineData"))
                .and_then(|inline| inline.get("data"))
                .and_then(Value::as_str)
                .ok_or(GenerationError::MissingField(
                    "candidates[0].content.parts[0].inlineData.data",
                ))?;

            Ok(data.to_string())
        }
    }
}
