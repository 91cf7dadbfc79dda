// SW-P-08 message payloads.
//
// The first payload byte is the command. Crosspoint messages carry the
// matrix and level packed into one byte (matrix high nibble, level low
// nibble) and 0-based ports. Ports above 127 use the extended command set
// (command | 0x80) with two-byte big-endian ports.

use std::fmt;

/// Fixed width of a name field on the wire.
pub const NAME_LEN: usize = 8;

pub mod command {
    pub const CROSSPOINT_INTERROGATE: u8 = 0x01;
    pub const CROSSPOINT_CONNECT: u8 = 0x02;
    pub const CROSSPOINT_TALLY: u8 = 0x03;
    pub const CROSSPOINT_CONNECTED: u8 = 0x04;
    pub const TALLY_DUMP_REQUEST: u8 = 0x15;
    pub const TALLY_DUMP: u8 = 0x16;
    pub const SOURCE_NAMES_REQUEST: u8 = 0x64;
    pub const DEST_NAMES_REQUEST: u8 = 0x65;
    pub const SOURCE_NAMES: u8 = 0x6A;
    pub const DEST_NAMES: u8 = 0x6B;
    /// Extended command bit: two-byte ports.
    pub const EXTENDED: u8 = 0x80;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Swp08Message {
    /// Bare `DLE ACK`.
    Ack,
    /// Bare `DLE NAK`.
    Nak,

    CrosspointInterrogate {
        matrix: u8,
        level: u8,
        dest: u16,
    },
    CrosspointConnect {
        matrix: u8,
        level: u8,
        dest: u16,
        source: u16,
    },
    CrosspointTally {
        matrix: u8,
        level: u8,
        dest: u16,
        source: u16,
    },
    /// The interlock reply confirming a connect took effect.
    CrosspointConnected {
        matrix: u8,
        level: u8,
        dest: u16,
        source: u16,
    },

    TallyDumpRequest {
        matrix: u8,
        level: u8,
    },
    /// One chunk of the full-matrix tally dump: sources for consecutive
    /// destinations starting at `first_dest`.
    TallyDump {
        matrix: u8,
        level: u8,
        first_dest: u16,
        sources: Vec<u16>,
    },

    SourceNamesRequest {
        matrix: u8,
    },
    DestNamesRequest {
        matrix: u8,
    },
    SourceNames {
        matrix: u8,
        first: u16,
        names: Vec<String>,
    },
    DestNames {
        matrix: u8,
        first: u16,
        names: Vec<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadError {
    Empty,
    UnknownCommand(u8),
    Truncated(u8),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PayloadError::Empty => write!(f, "empty payload"),
            PayloadError::UnknownCommand(c) => write!(f, "unknown command {c:#04x}"),
            PayloadError::Truncated(c) => write!(f, "truncated payload for command {c:#04x}"),
        }
    }
}

impl std::error::Error for PayloadError {}

fn matrix_level(matrix: u8, level: u8) -> u8 {
    (matrix << 4) | (level & 0x0f)
}

fn split_matrix_level(ml: u8) -> (u8, u8) {
    (ml >> 4, ml & 0x0f)
}

fn encode_name(name: &str, out: &mut Vec<u8>) {
    let bytes = name.as_bytes();
    for i in 0..NAME_LEN {
        out.push(*bytes.get(i).unwrap_or(&b' '));
    }
}

fn decode_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end().to_string()
}

impl Swp08Message {
    /// Serialize to a payload (without framing). `Ack`/`Nak` have no
    /// payload form and return `None`.
    pub fn to_payload(&self) -> Option<Vec<u8>> {
        use command::*;
        let mut p = Vec::new();
        match self {
            Swp08Message::Ack | Swp08Message::Nak => return None,

            Swp08Message::CrosspointInterrogate { matrix, level, dest } => {
                if *dest > 0x7f {
                    p.extend_from_slice(&[
                        CROSSPOINT_INTERROGATE | EXTENDED,
                        matrix_level(*matrix, *level),
                    ]);
                    p.extend_from_slice(&dest.to_be_bytes());
                } else {
                    p.extend_from_slice(&[
                        CROSSPOINT_INTERROGATE,
                        matrix_level(*matrix, *level),
                        *dest as u8,
                    ]);
                }
            }
            Swp08Message::CrosspointConnect { matrix, level, dest, source } => {
                encode_crosspoint(CROSSPOINT_CONNECT, *matrix, *level, *dest, *source, &mut p)
            }
            Swp08Message::CrosspointTally { matrix, level, dest, source } => {
                encode_crosspoint(CROSSPOINT_TALLY, *matrix, *level, *dest, *source, &mut p)
            }
            Swp08Message::CrosspointConnected { matrix, level, dest, source } => {
                encode_crosspoint(CROSSPOINT_CONNECTED, *matrix, *level, *dest, *source, &mut p)
            }

            Swp08Message::TallyDumpRequest { matrix, level } => {
                p.extend_from_slice(&[TALLY_DUMP_REQUEST, matrix_level(*matrix, *level)]);
            }
            Swp08Message::TallyDump { matrix, level, first_dest, sources } => {
                let last_dest = first_dest + sources.len().max(1) as u16 - 1;
                let wide = last_dest > 0x7f || sources.iter().any(|s| *s > 0x7f);
                if wide {
                    p.extend_from_slice(&[
                        TALLY_DUMP | EXTENDED,
                        matrix_level(*matrix, *level),
                        sources.len() as u8,
                    ]);
                    p.extend_from_slice(&first_dest.to_be_bytes());
                    for s in sources {
                        p.extend_from_slice(&s.to_be_bytes());
                    }
                } else {
                    p.extend_from_slice(&[
                        TALLY_DUMP,
                        matrix_level(*matrix, *level),
                        sources.len() as u8,
                        *first_dest as u8,
                    ]);
                    for s in sources {
                        p.push(*s as u8);
                    }
                }
            }

            Swp08Message::SourceNamesRequest { matrix } => {
                p.extend_from_slice(&[SOURCE_NAMES_REQUEST, *matrix]);
            }
            Swp08Message::DestNamesRequest { matrix } => {
                p.extend_from_slice(&[DEST_NAMES_REQUEST, *matrix]);
            }
            Swp08Message::SourceNames { matrix, first, names } => {
                encode_names(SOURCE_NAMES, *matrix, *first, names, &mut p)
            }
            Swp08Message::DestNames { matrix, first, names } => {
                encode_names(DEST_NAMES, *matrix, *first, names, &mut p)
            }
        }
        Some(p)
    }

    /// Parse a deframed payload.
    pub fn from_payload(p: &[u8]) -> Result<Swp08Message, PayloadError> {
        use command::*;
        let cmd = *p.first().ok_or(PayloadError::Empty)?;
        let body = &p[1..];
        let wide = cmd & EXTENDED != 0;
        let msg = match cmd & !EXTENDED {
            CROSSPOINT_INTERROGATE => {
                let (ml, rest) = take(cmd, body, 1)?;
                let (matrix, level) = split_matrix_level(ml[0]);
                let (dest, _) = take_port(cmd, rest, wide)?;
                Swp08Message::CrosspointInterrogate { matrix, level, dest }
            }
            CROSSPOINT_CONNECT | CROSSPOINT_TALLY | CROSSPOINT_CONNECTED => {
                let (ml, rest) = take(cmd, body, 1)?;
                let (matrix, level) = split_matrix_level(ml[0]);
                let (dest, rest) = take_port(cmd, rest, wide)?;
                let (source, _) = take_port(cmd, rest, wide)?;
                match cmd & !EXTENDED {
                    CROSSPOINT_CONNECT => Swp08Message::CrosspointConnect { matrix, level, dest, source },
                    CROSSPOINT_TALLY => Swp08Message::CrosspointTally { matrix, level, dest, source },
                    _ => Swp08Message::CrosspointConnected { matrix, level, dest, source },
                }
            }

            TALLY_DUMP_REQUEST => {
                let (ml, _) = take(cmd, body, 1)?;
                let (matrix, level) = split_matrix_level(ml[0]);
                Swp08Message::TallyDumpRequest { matrix, level }
            }
            TALLY_DUMP => {
                let (head, mut rest) = take(cmd, body, 2)?;
                let (matrix, level) = split_matrix_level(head[0]);
                let count = head[1] as usize;
                let (first_dest, r) = take_port(cmd, rest, wide)?;
                rest = r;
                let mut sources = Vec::with_capacity(count);
                for _ in 0..count {
                    let (s, r) = take_port(cmd, rest, wide)?;
                    sources.push(s);
                    rest = r;
                }
                Swp08Message::TallyDump { matrix, level, first_dest, sources }
            }

            SOURCE_NAMES_REQUEST => {
                let (m, _) = take(cmd, body, 1)?;
                Swp08Message::SourceNamesRequest { matrix: m[0] }
            }
            DEST_NAMES_REQUEST => {
                let (m, _) = take(cmd, body, 1)?;
                Swp08Message::DestNamesRequest { matrix: m[0] }
            }
            SOURCE_NAMES | DEST_NAMES => {
                let (head, mut rest) = take(cmd, body, 4)?;
                let matrix = head[0];
                let count = head[1] as usize;
                let first = u16::from_be_bytes([head[2], head[3]]);
                let mut names = Vec::with_capacity(count);
                for _ in 0..count {
                    let (raw, r) = take(cmd, rest, NAME_LEN)?;
                    names.push(decode_name(raw));
                    rest = r;
                }
                if cmd & !EXTENDED == SOURCE_NAMES {
                    Swp08Message::SourceNames { matrix, first, names }
                } else {
                    Swp08Message::DestNames { matrix, first, names }
                }
            }

            other => return Err(PayloadError::UnknownCommand(other | (cmd & EXTENDED))),
        };
        Ok(msg)
    }
}

fn encode_crosspoint(cmd: u8, matrix: u8, level: u8, dest: u16, source: u16, p: &mut Vec<u8>) {
    if dest > 0x7f || source > 0x7f {
        p.extend_from_slice(&[cmd | command::EXTENDED, matrix_level(matrix, level)]);
        p.extend_from_slice(&dest.to_be_bytes());
        p.extend_from_slice(&source.to_be_bytes());
    } else {
        p.extend_from_slice(&[cmd, matrix_level(matrix, level), dest as u8, source as u8]);
    }
}

fn encode_names(cmd: u8, matrix: u8, first: u16, names: &[String], p: &mut Vec<u8>) {
    p.extend_from_slice(&[cmd, matrix, names.len() as u8]);
    p.extend_from_slice(&first.to_be_bytes());
    for n in names {
        encode_name(n, p);
    }
}

fn take<'a>(cmd: u8, i: &'a [u8], n: usize) -> Result<(&'a [u8], &'a [u8]), PayloadError> {
    if i.len() < n {
        return Err(PayloadError::Truncated(cmd));
    }
    Ok(i.split_at(n))
}

fn take_port(cmd: u8, i: &[u8], wide: bool) -> Result<(u16, &[u8]), PayloadError> {
    if wide {
        let (raw, rest) = take(cmd, i, 2)?;
        Ok((u16::from_be_bytes([raw[0], raw[1]]), rest))
    } else {
        let (raw, rest) = take(cmd, i, 1)?;
        Ok((raw[0] as u16, rest))
    }
}
