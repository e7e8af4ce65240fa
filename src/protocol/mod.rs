//! Client ↔ relay wire protocol (JSON text frames)
//!
//! | direction | shape |
//! |---|---|
//! | relay → client | `{"type":"open"}` |
//! | client → relay | `{"type":"input","media":{"data":"<base64>","mimeType":"audio/pcm;rate=16000"}}` |
//! | relay → client | `{"serverContent":{"modelTurn":{"parts":[{"inlineData":{...}}]}}}` |
//! | relay → client | `{"serverContent":{"interrupted":true}}` |

pub mod messages;

pub use messages::{ClientMessage, MediaChunk, ModelTurn, Part, RelayNotice, ServerContent, ServerMessage};
