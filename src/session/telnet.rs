//! Minimal Telnet option handling.
//!
//! Console servers speak Telnet but a scraping client needs none of its
//! options. The codec removes command sequences from the byte stream, refuses
//! every option the server offers or requests, and drops the NUL and XON
//! padding bytes some consoles emit.

use std::borrow::Cow;

pub(crate) const IAC: u8 = 255;
pub(crate) const DONT: u8 = 254;
pub(crate) const DO: u8 = 253;
pub(crate) const WONT: u8 = 252;
pub(crate) const WILL: u8 = 251;
pub(crate) const SB: u8 = 250;
pub(crate) const SE: u8 = 240;

const NUL: u8 = 0;
const XON: u8 = 0x11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Sub,
    SubIac,
}

/// Output of one decode step.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Decoded {
    /// Payload bytes with Telnet commands removed.
    pub data: Vec<u8>,
    /// Negotiation replies to write back to the server.
    pub replies: Vec<u8>,
}

/// Streaming Telnet decoder. State carries across chunk boundaries.
#[derive(Debug, Default)]
pub(crate) struct TelnetCodec {
    state: State,
}

impl TelnetCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, input: &[u8]) -> Decoded {
        let mut out = Decoded::default();
        for &byte in input {
            self.state = match self.state {
                State::Data => match byte {
                    IAC => State::Iac,
                    NUL | XON => State::Data,
                    b => {
                        out.data.push(b);
                        State::Data
                    }
                },
                State::Iac => match byte {
                    IAC => {
                        out.data.push(IAC);
                        State::Data
                    }
                    DO | DONT | WILL | WONT => State::Negotiate(byte),
                    SB => State::Sub,
                    // NOP, GA, AYT and friends carry no payload.
                    _ => State::Data,
                },
                State::Negotiate(cmd) => {
                    match cmd {
                        DO => out.replies.extend_from_slice(&[IAC, WONT, byte]),
                        WILL => out.replies.extend_from_slice(&[IAC, DONT, byte]),
                        // Negative requests are already our state.
                        _ => {}
                    }
                    State::Data
                }
                State::Sub => match byte {
                    IAC => State::SubIac,
                    _ => State::Sub,
                },
                State::SubIac => match byte {
                    SE => State::Data,
                    _ => State::Sub,
                },
            };
        }
        out
    }
}

/// Doubles IAC bytes in outgoing payload.
pub(crate) fn escape(data: &[u8]) -> Cow<'_, [u8]> {
    if !data.contains(&IAC) {
        return Cow::Borrowed(data);
    }
    let mut escaped = Vec::with_capacity(data.len() + 4);
    for &byte in data {
        escaped.push(byte);
        if byte == IAC {
            escaped.push(IAC);
        }
    }
    Cow::Owned(escaped)
}
