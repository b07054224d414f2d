//! Incremental `multipart/*` framing for never-ending HTTP bodies.
//!
//! The camera's alert stream is a multipart response that only ends when the
//! connection does, so parts are cut out of the byte stream as chunks arrive.
//!
//! ```text
//! --boundary\r\n
//! Content-Type: application/xml\r\n
//! Content-Length: 478\r\n
//! \r\n
//! <EventNotificationAlert>...</EventNotificationAlert>\r\n
//! --boundary\r\n
//! ...
//! ```
//!
//! A part with `Content-Length` is emitted as soon as its body is complete;
//! otherwise it ends at the next delimiter line.

/// Boundary assumed when the response does not declare one.
pub const FALLBACK_BOUNDARY: &str = "boundary";

const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_PART_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultipartError {
    #[error("part headers exceed 16 KiB")]
    HeadersTooLarge,
    #[error("part body exceeds 4 MiB")]
    PartTooLarge,
    #[error("no boundary delimiter within 16 KiB")]
    MissingDelimiter,
    #[error("malformed part header: {0}")]
    BadHeader(String),
}

/// Extract the `boundary` parameter from a `Content-Type` header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    params.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// One section of the multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Part {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// `scanned` marks how far the buffer has already been searched, so each
/// pushed chunk is only scanned once.
enum State {
    Preamble,
    Headers {
        scanned: usize,
    },
    Body {
        headers: Vec<(String, String)>,
        content_length: Option<usize>,
        scanned: usize,
    },
    Finished,
}

enum Step {
    Progress,
    NeedMore,
    Emit(Part),
}

/// Push-based multipart splitter.
pub struct MultipartParser {
    /// `--` followed by the boundary
    delimiter: Vec<u8>,
    buf: Vec<u8>,
    state: State,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        Self {
            delimiter: format!("--{boundary}").into_bytes(),
            buf: Vec::new(),
            state: State::Preamble,
        }
    }

    /// Append bytes received from the connection.
    pub fn push(&mut self, chunk: &[u8]) {
        if !self.is_finished() {
            self.buf.extend_from_slice(chunk);
        }
    }

    /// True once the close delimiter has been seen.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Finished)
    }

    /// Next complete part, or `Ok(None)` until more bytes are pushed.
    pub fn next_part(&mut self) -> Result<Option<Part>, MultipartError> {
        loop {
            match self.step()? {
                Step::Progress => continue,
                Step::NeedMore => return Ok(None),
                Step::Emit(part) => return Ok(Some(part)),
            }
        }
    }

    fn step(&mut self) -> Result<Step, MultipartError> {
        match std::mem::replace(&mut self.state, State::Finished) {
            State::Finished => Ok(Step::NeedMore),
            State::Preamble => self.skip_delimiter(),
            State::Headers { scanned } => self.read_headers(scanned),
            State::Body {
                headers,
                content_length,
                scanned,
            } => self.read_body(headers, content_length, scanned),
        }
    }

    fn skip_delimiter(&mut self) -> Result<Step, MultipartError> {
        let Some(pos) = find_delimiter(&self.buf, &self.delimiter, 0) else {
            // Whole lines without a delimiter are preamble. Dropping them keeps
            // the buffer starting at a line boundary.
            match self.buf.iter().rposition(|b| *b == b'\n') {
                Some(last_nl) => {
                    self.buf.drain(..=last_nl);
                }
                None if self.buf.len() > MAX_HEADER_BYTES => {
                    return Err(MultipartError::MissingDelimiter);
                }
                None => {}
            }
            self.state = State::Preamble;
            return Ok(Step::NeedMore);
        };

        let after = pos + self.delimiter.len();
        let rest = &self.buf[after..];
        if rest.len() < 2 {
            self.state = State::Preamble;
            return Ok(Step::NeedMore);
        }
        if rest.starts_with(b"--") {
            self.buf.clear();
            self.state = State::Finished;
            return Ok(Step::Progress);
        }

        let Some(nl) = rest.iter().position(|b| *b == b'\n') else {
            if rest.len() > MAX_HEADER_BYTES {
                return Err(MultipartError::HeadersTooLarge);
            }
            self.state = State::Preamble;
            return Ok(Step::NeedMore);
        };

        // Only transport padding may follow the boundary on its line.
        let padding_only = rest[..nl]
            .iter()
            .all(|b| matches!(b, b' ' | b'\t' | b'\r'));
        self.buf.drain(..after + nl + 1);
        self.state = if padding_only {
            State::Headers { scanned: 0 }
        } else {
            State::Preamble
        };
        Ok(Step::Progress)
    }

    fn read_headers(&mut self, scanned: usize) -> Result<Step, MultipartError> {
        for blank in [&b"\r\n"[..], &b"\n"[..]] {
            if self.buf.starts_with(blank) {
                self.buf.drain(..blank.len());
                self.state = State::Body {
                    headers: Vec::new(),
                    content_length: None,
                    scanned: 0,
                };
                return Ok(Step::Progress);
            }
        }

        let end = find(&self.buf, b"\r\n\r\n", scanned)
            .map(|i| (i, 4))
            .into_iter()
            .chain(find(&self.buf, b"\n\n", scanned).map(|i| (i, 2)))
            .min_by_key(|(i, _)| *i);
        let Some((end, sep_len)) = end else {
            if self.buf.len() > MAX_HEADER_BYTES {
                return Err(MultipartError::HeadersTooLarge);
            }
            // A separator may straddle the next chunk.
            self.state = State::Headers {
                scanned: self.buf.len().saturating_sub(3),
            };
            return Ok(Step::NeedMore);
        };

        let block = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        let mut headers = Vec::new();
        for line in block.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| MultipartError::BadHeader(line.to_string()))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
        self.buf.drain(..end + sep_len);

        let content_length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse::<usize>().ok());
        self.state = State::Body {
            headers,
            content_length,
            scanned: 0,
        };
        Ok(Step::Progress)
    }

    fn read_body(
        &mut self,
        headers: Vec<(String, String)>,
        content_length: Option<usize>,
        scanned: usize,
    ) -> Result<Step, MultipartError> {
        if let Some(len) = content_length {
            if len > MAX_PART_BYTES {
                return Err(MultipartError::PartTooLarge);
            }
            if self.buf.len() < len {
                self.state = State::Body {
                    headers,
                    content_length,
                    scanned,
                };
                return Ok(Step::NeedMore);
            }
            let body = self.buf.drain(..len).collect();
            self.state = State::Preamble;
            return Ok(Step::Emit(Part { headers, body }));
        }

        let mut from = scanned;
        let pos = loop {
            let Some(pos) = find_delimiter(&self.buf, &self.delimiter, from) else {
                if self.buf.len() > MAX_PART_BYTES {
                    return Err(MultipartError::PartTooLarge);
                }
                // Resume where a delimiter could still be completed.
                from = (self.buf.len() + 1).saturating_sub(self.delimiter.len());
                self.state = State::Body {
                    headers,
                    content_length,
                    scanned: from.max(scanned),
                };
                return Ok(Step::NeedMore);
            };
            match delimiter_line(&self.buf[pos + self.delimiter.len()..]) {
                Some(true) => break pos,
                // Body text that merely starts with the boundary.
                Some(false) => from = pos + 1,
                None => {
                    self.state = State::Body {
                        headers,
                        content_length,
                        scanned: pos,
                    };
                    return Ok(Step::NeedMore);
                }
            }
        };

        // The line break before the delimiter belongs to the delimiter.
        let mut end = pos;
        if end > 0 && self.buf[end - 1] == b'\n' {
            end -= 1;
            if end > 0 && self.buf[end - 1] == b'\r' {
                end -= 1;
            }
        }
        let body = self.buf[..end].to_vec();
        self.buf.drain(..pos);
        self.state = State::Preamble;
        Ok(Step::Emit(Part { headers, body }))
    }
}

/// Whether the bytes after a boundary make it a real delimiter line: a close
/// marker `--`, or only transport padding up to the line break. `None` until
/// enough bytes have arrived to tell.
fn delimiter_line(rest: &[u8]) -> Option<bool> {
    if rest.starts_with(b"--") {
        return Some(true);
    }
    if rest.len() < 2 && b"--".starts_with(rest) {
        return None;
    }
    for &b in rest {
        match b {
            b'\n' => return Some(true),
            b' ' | b'\t' | b'\r' => continue,
            _ => return Some(false),
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Position of `delimiter` at the start of a line.
fn find_delimiter(buf: &[u8], delimiter: &[u8], from: usize) -> Option<usize> {
    let mut offset = from;
    while let Some(pos) = find(buf, delimiter, offset) {
        if pos == 0 || buf[pos - 1] == b'\n' {
            return Some(pos);
        }
        offset = pos + 1;
    }
    None
}
