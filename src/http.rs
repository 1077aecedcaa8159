/*!
HTTP helpers for the gateway listener: tolerant request parsing and response writers.

This module keeps a minimal request model: method, raw path, raw query string, lowercased
headers and body. Header termination accepts CRLFCRLF and LFLF, headers are capped at 64 KiB
and bodies (Content-Length or chunked) at 1 MiB.
*/

use std::collections::HashMap;
use std::io::{self, Read, Write};

use crate::util::find_header_end;

const HDR_CAP: usize = 64 * 1024;
const BODY_CAP: usize = 1024 * 1024;

/// Simple case-insensitive header map (keys lowercased)
pub type HeaderMap = HashMap<String, String>;

/// Parsed HTTP request. The query string is kept raw; argument extraction decodes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Parse a single HTTP request from a reader.
pub fn read_http_request<R: Read>(reader: &mut R) -> io::Result<HttpRequest> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    let mut header_end: Option<usize> = None;

    while header_end.is_none() && buf.len() < HDR_CAP {
        let n = reader.read(&mut tmp)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        header_end = find_header_end(&buf);
    }
    if buf.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before request line",
        ));
    }

    let (header_bytes, body_start) = match header_end {
        Some(end) if end >= 4 && &buf[end - 4..end] == b"\r\n\r\n" => (&buf[..end - 4], end),
        Some(end) => (&buf[..end - 2], end),
        None => (&buf[..], buf.len()),
    };

    let header_str = String::from_utf8_lossy(header_bytes);
    let mut lines = header_str.lines();
    let request_line = lines.next().unwrap_or_default().trim().to_string();
    let (method, path, query) = parse_request_line(&request_line)?;
    let headers = parse_headers(lines);

    let already = buf[body_start..].to_vec();
    let chunked = headers
        .get("transfer-encoding")
        .map(|s| s.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    let body = if chunked {
        read_chunked_body(reader, already)?
    } else {
        let content_len = headers
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0)
            .min(BODY_CAP);
        read_sized_body(reader, already, content_len)?
    };

    Ok(HttpRequest {
        method,
        path,
        query,
        headers,
        body,
    })
}

fn parse_request_line(line: &str) -> io::Result<(String, String, Option<String>)> {
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or("").to_ascii_uppercase();
    let target = parts.next().unwrap_or("");
    if method.is_empty() || !target.starts_with('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed request line: {line:?}"),
        ));
    }
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.to_string(), None),
    };
    Ok((method, path, query))
}

fn parse_headers<'a, I: Iterator<Item = &'a str>>(lines: I) -> HeaderMap {
    let mut map = HeaderMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            map.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }
    map
}

fn read_sized_body<R: Read>(
    reader: &mut R,
    mut body: Vec<u8>,
    content_len: usize,
) -> io::Result<Vec<u8>> {
    body.truncate(content_len);
    let mut tmp = [0u8; 8 * 1024];
    while body.len() < content_len {
        let want = (content_len - body.len()).min(tmp.len());
        let n = reader.read(&mut tmp[..want])?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&tmp[..n]);
    }
    Ok(body)
}

/// Buffered line/byte reader over already-read bytes plus the socket.
struct ChunkCursor<'r, R> {
    reader: &'r mut R,
    rbuf: Vec<u8>,
}

impl<R: Read> ChunkCursor<'_, R> {
    fn fill(&mut self) -> io::Result<bool> {
        let mut tmp = [0u8; 1024];
        let n = self.reader.read(&mut tmp)?;
        self.rbuf.extend_from_slice(&tmp[..n]);
        Ok(n > 0)
    }

    fn line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(pos) = self.rbuf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.rbuf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if !self.fill()? {
                return Ok(None);
            }
        }
    }

    fn take(&mut self, n: usize) -> io::Result<Vec<u8>> {
        while self.rbuf.len() < n {
            if !self.fill()? {
                break;
            }
        }
        let n = n.min(self.rbuf.len());
        Ok(self.rbuf.drain(..n).collect())
    }
}

fn read_chunked_body<R: Read>(reader: &mut R, already: Vec<u8>) -> io::Result<Vec<u8>> {
    let mut cur = ChunkCursor {
        reader,
        rbuf: already,
    };
    let mut body = Vec::new();
    while let Some(ln) = cur.line()? {
        let ln = ln.trim();
        if ln.is_empty() {
            continue;
        }
        let size_hex = ln.split(';').next().unwrap_or(ln).trim();
        let size = usize::from_str_radix(size_hex, 16).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "invalid chunk size")
        })?;
        if size == 0 {
            // Trailers until blank line
            while let Some(tr) = cur.line()? {
                if tr.trim().is_empty() {
                    break;
                }
            }
            break;
        }
        let data = cur.take(size)?;
        let room = BODY_CAP.saturating_sub(body.len());
        body.extend_from_slice(&data[..data.len().min(room)]);
        if data.len() < size {
            break;
        }
    }
    Ok(body)
}

/// Write a complete non-streamed response and flush.
pub fn respond_plain<W: Write>(w: &mut W, status: &str, body: &[u8]) -> io::Result<()> {
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    w.write_all(header.as_bytes())?;
    w.write_all(body)?;
    w.flush()
}

/// Status line and headers of a streamed (chunked) response.
pub fn respond_chunked_prelude<W: Write>(w: &mut W, request_id: Option<&str>) -> io::Result<()> {
    let mut hdr = String::from(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nTransfer-Encoding: chunked\r\nTrailer: X-Exit-Code\r\nConnection: close\r\n",
    );
    if let Some(id) = request_id {
        hdr.push_str(&format!("X-Request-Id: {}\r\n", id));
    }
    hdr.push_str("\r\n");
    w.write_all(hdr.as_bytes())?;
    w.flush()
}

pub fn respond_chunked_write_chunk<W: Write>(w: &mut W, chunk: &[u8]) -> io::Result<()> {
    if !chunk.is_empty() {
        write!(w, "{:X}\r\n", chunk.len())?;
        w.write_all(chunk)?;
        w.write_all(b"\r\n")?;
        w.flush()?;
    }
    Ok(())
}

/// Terminating chunk, with the exit code as trailer when known.
pub fn respond_chunked_end<W: Write>(w: &mut W, exit_code: Option<i32>) -> io::Result<()> {
    w.write_all(b"0\r\n")?;
    if let Some(code) = exit_code {
        write!(w, "X-Exit-Code: {code}\r\n")?;
    }
    w.write_all(b"\r\n")?;
    w.flush()
}

/// Decode a chunked response body (test and client helper).
pub fn decode_chunked(mut data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let Some(pos) = data.windows(2).position(|w| w == b"\r\n") else {
            break;
        };
        let size_line = String::from_utf8_lossy(&data[..pos]);
        let size = usize::from_str_radix(size_line.trim(), 16).unwrap_or(0);
        data = &data[pos + 2..];
        if size == 0 || data.len() < size {
            out.extend_from_slice(&data[..size.min(data.len())]);
            break;
        }
        out.extend_from_slice(&data[..size]);
        data = data.get(size + 2..).unwrap_or_default();
    }
    out
}
