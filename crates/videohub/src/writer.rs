// Videohub writer.
// Serializes into the same output the parser eats.

use super::model::*;
use bytes::{BufMut, BytesMut};
use std::io::{Result, Write};

impl VideohubMessage {
    /// Write a serialized VideohubMessage into a std::io::Writer.
    /// It is terminated by an empty line, completing the block.
    pub fn write_serialized(&self, mut w: impl Write) -> Result<()> {
        match self {
            VideohubMessage::Preamble(p) => {
                writeln!(w, "PROTOCOL PREAMBLE:")?;
                writeln!(w, "Version: {}", p.version)?;
            }
            VideohubMessage::DeviceInfo(d) => {
                writeln!(w, "VIDEOHUB DEVICE:")?;
                macro_rules! opt_val {
                    ($field:expr, $label:expr) => {
                        if let Some(v) = $field {
                            writeln!(w, "{}: {}", $label, v)?;
                        }
                    };
                }

                opt_val!(&d.present, "Device present");
                opt_val!(&d.model_name, "Model name");
                opt_val!(&d.friendly_name, "Friendly name");
                opt_val!(&d.unique_id, "Unique ID");
                opt_val!(d.video_inputs, "Video inputs");
                opt_val!(d.video_outputs, "Video outputs");

                if let Some(unknown) = &d.unknown_fields {
                    for kv in unknown.iter() {
                        writeln!(w, "{}: {}", &kv.key, &kv.value)?;
                    }
                }
            }
            VideohubMessage::InputLabels(v) => {
                writeln!(w, "INPUT LABELS:")?;
                for l in v {
                    writeln!(w, "{} {}", l.id, l.name)?;
                }
            }
            VideohubMessage::OutputLabels(v) => {
                writeln!(w, "OUTPUT LABELS:")?;
                for l in v {
                    writeln!(w, "{} {}", l.id, l.name)?;
                }
            }
            VideohubMessage::VideoOutputRouting(v) => {
                writeln!(w, "VIDEO OUTPUT ROUTING:")?;
                for r in v {
                    writeln!(w, "{} {}", r.to_output, r.from_input)?;
                }
            }
            VideohubMessage::VideoOutputLocks(v) => {
                writeln!(w, "VIDEO OUTPUT LOCKS:")?;
                for l in v {
                    writeln!(w, "{} {}", l.id, l.state)?;
                }
            }
            VideohubMessage::ACK => {
                writeln!(w, "ACK")?;
            }
            VideohubMessage::NAK => {
                writeln!(w, "NAK")?;
            }
            VideohubMessage::Ping => {
                writeln!(w, "PING:")?;
            }
            VideohubMessage::EndPrelude => {
                writeln!(w, "END PRELUDE:")?;
            }
            VideohubMessage::Unknown(h, body) => {
                w.write_all(&h[..])?;
                w.write_all(b"\n")?;
                w.write_all(&body[..])?;
            }
        }
        // trailing blank line
        writeln!(w)?;
        Ok(())
    }

    pub fn to_serialized(&self) -> Result<BytesMut> {
        let mut w = BytesMut::new().writer();
        self.write_serialized(&mut w)?;
        Ok(w.into_inner())
    }
}
