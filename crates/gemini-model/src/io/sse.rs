use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A type for reading server-sent events from a chunk stream.
pub struct Sse {
    buf: String,
    // Bytes of a UTF-8 sequence split across two chunks.
    partial: Vec<u8>,
    // A CR ended the last chunk; a leading LF of the next one belongs to it.
    pending_cr: bool,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: String::new(),
            partial: Vec::new(),
            pending_cr: false,
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // There may be complete events left over from the last read.
            if let Some(event) = self.try_parse_event()? {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                if self.pending_cr {
                    // The stream ended right after a lone CR.
                    self.pending_cr = false;
                    self.buf.push('\n');
                    continue;
                }
                // Abort if no more data available.
                return Ok(None);
            };
            self.push_bytes(&bytes)?;
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.partial.extend_from_slice(bytes);
        let valid_up_to = match str::from_utf8(&self.partial) {
            Ok(s) => s.len(),
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => return Err(Error::InvalidPayload),
        };
        let rest = self.partial.split_off(valid_up_to);
        let text = String::from_utf8(std::mem::replace(&mut self.partial, rest))
            .map_err(|_| Error::InvalidPayload)?;

        // Every `end-of-line` is stored as a single line feed.
        self.buf.reserve(text.len());
        for ch in text.chars() {
            if std::mem::take(&mut self.pending_cr) {
                self.buf.push('\n');
                if ch == '\n' {
                    continue;
                }
            }
            if ch == '\r' {
                self.pending_cr = true;
            } else {
                self.buf.push(ch);
            }
        }
        Ok(())
    }

    fn try_parse_event(&mut self) -> Result<Option<String>, Error> {
        // For event, we only handle the `data` field.
        //
        // event         = *( comment / field ) end-of-line
        // field         = 1*name-char [ colon [ space ] *any-char ] end-of-line
        // end-of-line   = ( cr lf / cr / lf )
        let Some(eol_idx) = self.buf.find("\n\n") else {
            return Ok(None);
        };

        let mut data: Option<String> = None;
        for field in self.buf[0..eol_idx].lines() {
            if field.starts_with(':') {
                continue;
            }
            let (name, value) = field.split_once(':').unwrap_or((field, ""));
            if name != "data" {
                // Other fields are not supported.
                return Err(Error::InvalidPayload);
            }
            let value = value.strip_prefix(' ').unwrap_or(value);
            match &mut data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => data = Some(value.to_owned()),
            }
        }

        // Consume the bytes from the buffer.
        self.buf.drain(0..eol_idx + 2);

        match data {
            Some(data) => Ok(Some(data)),
            // A comment-only block, keep looking.
            None => self.try_parse_event(),
        }
    }
}
