// Tests for the client <-> relay wire protocol and downlink decoding

use anyhow::Result;
use treez_live::audio::AudioFrame;
use treez_live::client::{Downlink, DownlinkEvent};
use treez_live::protocol::{ClientMessage, RelayNotice, ServerMessage};

#[test]
fn test_input_message_shape() -> Result<()> {
    let frame = AudioFrame::new(vec![1, -2, 3, -4], 16000);
    let json: serde_json::Value = serde_json::from_str(&ClientMessage::input(&frame).to_json()?)?;

    assert_eq!(json["type"], "input");
    assert_eq!(json["media"]["mimeType"], "audio/pcm;rate=16000");
    assert_eq!(json["media"]["data"], frame.to_base64());
    Ok(())
}

#[test]
fn test_open_notice_shape() {
    assert_eq!(RelayNotice::Open.to_json(), r#"{"type":"open"}"#);
}

#[test]
fn test_unknown_client_message_type_is_not_an_error() -> Result<()> {
    let message = ClientMessage::parse(r#"{"type":"video","frame":"..."}"#)?;
    assert_eq!(message, ClientMessage::Unknown);
    Ok(())
}

#[test]
fn test_client_message_without_type_is_malformed() {
    assert!(ClientMessage::parse(r#"{"media":{}}"#).is_err());
    assert!(ClientMessage::parse("not json").is_err());
}

#[test]
fn test_server_message_ignores_unknown_fields() -> Result<()> {
    let message = ServerMessage::parse(
        r#"{"usageMetadata":{"totalTokenCount":12},"serverContent":{"generationComplete":true}}"#,
    )?;
    assert!(message.audio_parts().is_empty());
    assert!(!message.is_interrupted());
    Ok(())
}

#[test]
fn test_every_audio_part_is_decoded_in_order() {
    let first = AudioFrame::new(vec![100; 240], 24000);
    let second = AudioFrame::new(vec![-100; 480], 24000);
    let text = format!(
        r#"{{"serverContent":{{"modelTurn":{{"parts":[
            {{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}},
            {{"text":"thinking"}},
            {{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}}
        ]}}}}}}"#,
        first.to_base64(),
        second.to_base64()
    );

    let events = Downlink::new().decode(&text);
    assert_eq!(events, vec![DownlinkEvent::Audio(vec![first, second])]);
}

#[test]
fn test_audio_then_interruption_in_one_message() {
    let frame = AudioFrame::new(vec![7; 10], 24000);
    let mut message = ServerMessage::audio(&frame);
    if let Some(content) = message.server_content.as_mut() {
        content.interrupted = true;
    }

    let events = Downlink::new().decode(&message.to_json().unwrap());
    assert_eq!(
        events,
        vec![DownlinkEvent::Audio(vec![frame]), DownlinkEvent::Interrupted]
    );
}

#[test]
fn test_downlink_open_and_interrupt() {
    let mut downlink = Downlink::new();

    assert_eq!(downlink.decode(r#"{"type":"open"}"#), vec![DownlinkEvent::Open]);
    assert_eq!(
        downlink.decode(&ServerMessage::interrupted().to_json().unwrap()),
        vec![DownlinkEvent::Interrupted]
    );
    assert_eq!(
        downlink.decode(r#"{"serverContent":{"turnComplete":true}}"#),
        vec![DownlinkEvent::TurnComplete]
    );
}

#[test]
fn test_downlink_drops_malformed_and_ignores_unknown() {
    let mut downlink = Downlink::new();

    assert!(downlink.decode("{not json").is_empty());
    assert!(downlink
        .decode(r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"AAA"}}]}}}"#)
        .is_empty());
    assert_eq!(downlink.malformed(), 2);

    // Zero-rate PCM has no duration; each such part is dropped and counted
    let zero_rate = r#"{"serverContent":{"modelTurn":{"parts":[
        {"inlineData":{"mimeType":"audio/pcm;rate=0","data":"AAAAAA=="}},
        {"inlineData":{"mimeType":"audio/pcm;rate=0","data":"AAAAAA=="}}]}}}"#;
    assert!(downlink.decode(zero_rate).is_empty());
    assert_eq!(downlink.malformed(), 4);

    // A good part next to a zero-rate one still plays
    let mixed = r#"{"serverContent":{"modelTurn":{"parts":[
        {"inlineData":{"mimeType":"audio/pcm;rate=0","data":"AAAAAA=="}},
        {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAAAA=="}}]}}}"#;
    match downlink.decode(mixed).as_slice() {
        [DownlinkEvent::Audio(frames)] => {
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].sample_rate, 24000);
            assert_eq!(frames[0].samples.len(), 2);
        }
        other => panic!("unexpected events {:?}", other),
    }
    assert_eq!(downlink.malformed(), 5);

    assert!(downlink.decode(r#"{"type":"pong"}"#).is_empty());
    assert_eq!(downlink.ignored(), 3);
}
