//! JSON wire format of the live conversational endpoint.
//!
//! # Client → server
//!
//! ```text
//! {"setup": {"model": "models/…", "generationConfig": {…}, "systemInstruction": {…},
//!            "inputAudioTranscription": {}, "outputAudioTranscription": {}}}
//! {"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "<b64>"}]}}
//! {"realtimeInput": {"text": "…"}}
//! ```
//!
//! # Server → client
//!
//! ```text
//! {"setupComplete": {}}
//! {"serverContent": {"inputTranscription": {"text": "…"}, "outputTranscription": {"text": "…"},
//!                    "modelTurn": {"parts": [{"inlineData": {"mimeType": "…", "data": "<b64>"}}]},
//!                    "interrupted": true, "turnComplete": true}}
//! {"goAway": {"timeLeft": "10s"}}
//! ```

use serde::Deserialize;
use serde_json::{json, Value};

use crate::audio::codec::AudioFrame;
use crate::transport::connection::{TransportConfig, TransportError};
use crate::transport::event::{ServerEvent, Speaker};

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// First message on a fresh connection.
pub fn setup_message(config: &TransportConfig) -> Value {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    let mut setup = json!({
        "model": model,
        "generationConfig": {
            "responseModalities": config.response_modalities,
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": config.voice }
                }
            }
        },
        "systemInstruction": {
            "parts": [ { "text": config.system_instruction } ]
        }
    });

    if config.input_transcription {
        setup["inputAudioTranscription"] = json!({});
    }
    if config.output_transcription {
        setup["outputAudioTranscription"] = json!({});
    }

    json!({ "setup": setup })
}

/// One captured microphone frame.
pub fn audio_message(frame: &AudioFrame) -> Value {
    json!({
        "realtimeInput": {
            "mediaChunks": [
                { "mimeType": frame.mime_type(), "data": frame.to_base64() }
            ]
        }
    })
}

/// A typed text turn.
pub fn text_message(text: &str) -> Value {
    json!({ "realtimeInput": { "text": text } })
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

/// A server message flattened into session-level events.
#[derive(Debug, Default, PartialEq)]
pub struct ParsedMessage {
    /// The endpoint acknowledged the setup message.
    pub setup_complete: bool,
    /// Events in the order the session must apply them.
    pub events: Vec<ServerEvent>,
}

/// Parse one JSON server message.
///
/// Unknown fields are ignored; a message with nothing recognisable yields
/// no events.  Order within a message: transcripts (model, then user),
/// audio, interruption, turn completion, go-away.
pub fn parse_server_message(raw: &str) -> Result<ParsedMessage, TransportError> {
    let msg: ServerMessage = serde_json::from_str(raw)
        .map_err(|e| TransportError::Protocol(format!("unparseable server message: {e}")))?;

    let mut parsed = ParsedMessage {
        setup_complete: msg.setup_complete.is_some(),
        events: Vec::new(),
    };

    if let Some(content) = msg.server_content {
        let transcripts = [
            (Speaker::Model, content.output_transcription),
            (Speaker::User, content.input_transcription),
        ];
        for (speaker, t) in transcripts {
            if let Some(text) = t.and_then(|t| t.text).filter(|s| !s.is_empty()) {
                parsed
                    .events
                    .push(ServerEvent::PartialTranscript { speaker, text });
            }
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    parsed
                        .events
                        .push(ServerEvent::AudioChunk { data: inline.data });
                }
            }
        }

        if content.interrupted {
            parsed.events.push(ServerEvent::Interrupted);
        }
        if content.turn_complete {
            parsed.events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(go_away) = msg.go_away {
        parsed.events.push(ServerEvent::Closed {
            reason: format!(
                "server requested disconnect (time left: {})",
                go_away.time_left.as_deref().unwrap_or("unknown")
            ),
        });
    }

    Ok(parsed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TransportConfig {
        TransportConfig {
            system_instruction: "You are Sarah, a skeptical CFO.".into(),
            ..TransportConfig::default()
        }
    }

    // ---- outbound ----------------------------------------------------------

    #[test]
    fn setup_carries_persona_voice_and_transcription_flags() {
        let msg = setup_message(&config());
        let setup = &msg["setup"];
        assert_eq!(
            setup["model"],
            "models/gemini-2.5-flash-native-audio-preview-09-2025"
        );
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Zephyr"
        );
        assert_eq!(
            setup["systemInstruction"]["parts"][0]["text"],
            "You are Sarah, a skeptical CFO."
        );
        assert!(setup["inputAudioTranscription"].is_object());
        assert!(setup["outputAudioTranscription"].is_object());
    }

    #[test]
    fn setup_omits_disabled_transcription() {
        let mut cfg = config();
        cfg.input_transcription = false;
        cfg.model = "models/custom".into();
        let msg = setup_message(&cfg);
        assert!(msg["setup"].get("inputAudioTranscription").is_none());
        assert_eq!(msg["setup"]["model"], "models/custom");
    }

    #[test]
    fn audio_message_wraps_frame() {
        let frame = AudioFrame::from_samples(&[0.0, 0.5], 16_000);
        let msg = audio_message(&frame);
        let chunk = &msg["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AAAAQA==");
    }

    #[test]
    fn text_message_shape() {
        assert_eq!(
            text_message("hello").to_string(),
            r#"{"realtimeInput":{"text":"hello"}}"#
        );
    }

    // ---- inbound -----------------------------------------------------------

    #[test]
    fn setup_complete_is_recognised() {
        let parsed = parse_server_message(r#"{"setupComplete":{}}"#).unwrap();
        assert!(parsed.setup_complete);
        assert!(parsed.events.is_empty());
    }

    #[test]
    fn transcripts_and_audio_are_flattened_in_order() {
        let raw = r#"{"serverContent":{
            "inputTranscription":{"text":"Hi"},
            "outputTranscription":{"text":"Hello"},
            "modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}},
                                  {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AQE="}}]},
            "turnComplete":true}}"#;
        let parsed = parse_server_message(raw).unwrap();
        assert_eq!(
            parsed.events,
            vec![
                ServerEvent::PartialTranscript {
                    speaker: Speaker::Model,
                    text: "Hello".into()
                },
                ServerEvent::PartialTranscript {
                    speaker: Speaker::User,
                    text: "Hi".into()
                },
                ServerEvent::AudioChunk { data: "AAA=".into() },
                ServerEvent::AudioChunk { data: "AQE=".into() },
                ServerEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn interrupted_precedes_turn_complete() {
        let parsed =
            parse_server_message(r#"{"serverContent":{"turnComplete":true,"interrupted":true}}"#)
                .unwrap();
        assert_eq!(
            parsed.events,
            vec![ServerEvent::Interrupted, ServerEvent::TurnComplete]
        );
    }

    #[test]
    fn empty_transcription_is_ignored() {
        let parsed =
            parse_server_message(r#"{"serverContent":{"inputTranscription":{}}}"#).unwrap();
        assert!(parsed.events.is_empty());
    }

    #[test]
    fn go_away_becomes_closed() {
        let parsed = parse_server_message(r#"{"goAway":{"timeLeft":"5s"}}"#).unwrap();
        assert!(matches!(parsed.events[0], ServerEvent::Closed { .. }));
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(matches!(
            parse_server_message("not json"),
            Err(TransportError::Protocol(_))
        ));
    }
}
