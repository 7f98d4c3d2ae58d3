//! Tagged message types and the multipart frame codec.

use lockstep_types::SimTime;
use thiserror::Error;

/// ASCII message-type tags, the second frame of every message.
pub mod tag {
    pub const HELLO: &[u8] = b"hello";
    pub const ACK: &[u8] = b"ack";
    pub const TIME_REQUEST: &[u8] = b"time_request";
    pub const TIME_DELTA: &[u8] = b"time_delta";
    pub const PUBLISH: &[u8] = b"publish";
    pub const BYE: &[u8] = b"bye";
    pub const DIE: &[u8] = b"die";
}

/// Errors from decoding a multipart message.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message missing {0} frame")]
    MissingFrame(&'static str),

    #[error("invalid {frame} frame: {reason}")]
    InvalidFrame { frame: &'static str, reason: String },

    #[error("unknown message type '{0}'")]
    UnknownTag(String),
}

/// One application message, after the transport has stripped the identity
/// frame.
///
/// `Hello`, `TimeRequest`, `TimeDelta`, `Publish`, `Bye` and `Die` arrive
/// from simulators; `Ack`, `TimeRequest` (a grant), `Publish` (a forward),
/// `Bye` and `Die` go back out. Payload frames are decimal ASCII for times
/// and ordinals, opaque bytes for HELLO configs and published values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Join request carrying the raw config payload.
    Hello { config: Vec<u8> },
    /// Registration complete; `ordinal` of the receiver and `total` peers.
    Ack { ordinal: u64, total: u64 },
    /// Inbound: finished at the current grant, next target. Outbound: grant.
    TimeRequest { time: SimTime },
    /// Update the sender's local tick.
    TimeDelta { delta: SimTime },
    /// One published value, forwarded verbatim to subscribers.
    Publish { topic: String, value: Vec<u8> },
    /// Sender leaves (inbound) / global termination (outbound).
    Bye,
    /// Abort the entire session.
    Die,
}

impl Message {
    /// Decode the frames that follow the identity frame.
    ///
    /// Trailing frames beyond what a type defines are tolerated and
    /// ignored, matching the wire's opaque-frame model.
    pub fn decode(frames: &[Vec<u8>]) -> Result<Message, MessageError> {
        let tag_frame = frames.first().ok_or(MessageError::MissingFrame("type"))?;

        match tag_frame.as_slice() {
            tag::HELLO => {
                let config = frames.get(1).ok_or(MessageError::MissingFrame("config"))?;
                Ok(Message::Hello {
                    config: config.clone(),
                })
            }
            tag::ACK => {
                let ordinal = decode_decimal(frames.get(1), "ordinal")?;
                let total = decode_decimal(frames.get(2), "total")?;
                Ok(Message::Ack { ordinal, total })
            }
            tag::TIME_REQUEST => {
                let time = decode_time(frames.get(1), "time")?;
                Ok(Message::TimeRequest { time })
            }
            tag::TIME_DELTA => {
                let delta = decode_time(frames.get(1), "delta")?;
                Ok(Message::TimeDelta { delta })
            }
            tag::PUBLISH => {
                let topic_frame = frames.get(1).ok_or(MessageError::MissingFrame("topic"))?;
                let topic = std::str::from_utf8(topic_frame)
                    .map_err(|e| MessageError::InvalidFrame {
                        frame: "topic",
                        reason: e.to_string(),
                    })?
                    .to_string();
                let value = frames.get(2).ok_or(MessageError::MissingFrame("value"))?;
                Ok(Message::Publish {
                    topic,
                    value: value.clone(),
                })
            }
            tag::BYE => Ok(Message::Bye),
            tag::DIE => Ok(Message::Die),
            other => Err(MessageError::UnknownTag(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    /// Encode into the frames that follow the identity frame.
    pub fn encode(&self) -> Vec<Vec<u8>> {
        match self {
            Message::Hello { config } => vec![tag::HELLO.to_vec(), config.clone()],
            Message::Ack { ordinal, total } => vec![
                tag::ACK.to_vec(),
                ordinal.to_string().into_bytes(),
                total.to_string().into_bytes(),
            ],
            Message::TimeRequest { time } => {
                vec![tag::TIME_REQUEST.to_vec(), time.to_string().into_bytes()]
            }
            Message::TimeDelta { delta } => {
                vec![tag::TIME_DELTA.to_vec(), delta.to_string().into_bytes()]
            }
            Message::Publish { topic, value } => vec![
                tag::PUBLISH.to_vec(),
                topic.as_bytes().to_vec(),
                value.clone(),
            ],
            Message::Bye => vec![tag::BYE.to_vec()],
            Message::Die => vec![tag::DIE.to_vec()],
        }
    }

    /// The tag name, for log lines.
    pub fn tag_name(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::Ack { .. } => "ack",
            Message::TimeRequest { .. } => "time_request",
            Message::TimeDelta { .. } => "time_delta",
            Message::Publish { .. } => "publish",
            Message::Bye => "bye",
            Message::Die => "die",
        }
    }
}

fn decode_decimal(frame: Option<&Vec<u8>>, name: &'static str) -> Result<u64, MessageError> {
    let frame = frame.ok_or(MessageError::MissingFrame(name))?;
    std::str::from_utf8(frame)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| MessageError::InvalidFrame {
            frame: name,
            reason: format!("'{}' is not decimal ASCII", String::from_utf8_lossy(frame)),
        })
}

fn decode_time(frame: Option<&Vec<u8>>, name: &'static str) -> Result<SimTime, MessageError> {
    decode_decimal(frame, name).map(SimTime::from_nanos)
}
