//! Incremental FeatureCollection parser.
//!
//! Splits a byte stream into top-level members of a FeatureCollection
//! without buffering the whole document. Each element of the `features`
//! array is handed to `serde_json` as soon as its closing brace arrives and
//! is then dropped from the parser's buffer, so memory held by the parser is
//! bounded by the largest single feature rather than the document size.
//!
//! The scanner only tracks structure (objects, arrays, strings, escapes).
//! Validity of each value is left to `serde_json`, which sees one member or
//! one feature at a time.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::Error;
use crate::geojson::{CollectionKind, Feature, FeatureCollection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the opening `{`.
    Start,
    /// Expecting a member name (or `}` when `first`).
    Key { first: bool },
    /// Expecting the `:` after a member name.
    Colon,
    /// Expecting a scalar/object member value.
    Value,
    /// Expecting the `[` that opens `features`.
    FeaturesOpen,
    /// Expecting a feature object (or `]` when `first`).
    Element { first: bool },
    /// Expecting `,` or `]` inside `features`.
    AfterElement,
    /// Expecting `,` or `}` after a member.
    AfterMember,
    /// Seen the closing `}`; only whitespace may follow.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanKind {
    Container,
    String,
    Scalar,
}

/// Progress through a single JSON value that may span chunks.
#[derive(Debug, Clone, Copy)]
struct Scan {
    kind: ScanKind,
    start: usize,
    depth: u32,
    in_string: bool,
    escape: bool,
}

impl Scan {
    fn begin(first: u8, start: usize) -> Self {
        let kind = match first {
            b'{' | b'[' => ScanKind::Container,
            b'"' => ScanKind::String,
            _ => ScanKind::Scalar,
        };
        Self {
            kind,
            start,
            depth: 0,
            in_string: false,
            escape: false,
        }
    }

    /// Advance over `buf[*pos..]`. Returns the exclusive end offset once the
    /// value is complete; `None` means more input is required.
    fn advance(&mut self, buf: &[u8], pos: &mut usize) -> Option<usize> {
        while let Some(&b) = buf.get(*pos) {
            match self.kind {
                ScanKind::Scalar => {
                    if matches!(b, b',' | b'}' | b']' | b' ' | b'\t' | b'\r' | b'\n') {
                        return Some(*pos);
                    }
                    *pos += 1;
                }
                ScanKind::String | ScanKind::Container => {
                    *pos += 1;
                    if self.in_string {
                        if self.escape {
                            self.escape = false;
                        } else if b == b'\\' {
                            self.escape = true;
                        } else if b == b'"' {
                            self.in_string = false;
                            if self.kind == ScanKind::String {
                                return Some(*pos);
                            }
                        }
                        continue;
                    }
                    match b {
                        b'"' => self.in_string = true,
                        b'{' | b'[' => self.depth += 1,
                        b'}' | b']' => {
                            self.depth = self.depth.saturating_sub(1);
                            if self.depth == 0 {
                                return Some(*pos);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        None
    }
}

/// Collection-level members captured while streaming.
#[derive(Debug, Default)]
struct Header {
    kind: Option<CollectionKind>,
    name: Option<String>,
    crs: Option<Value>,
    bbox: Option<Vec<f64>>,
    saw_features: bool,
}

/// Push-based incremental parser for a single FeatureCollection document.
///
/// Feed chunks with [`push`](Self::push); each call returns the features
/// completed by that chunk, in document order. Call
/// [`finish`](Self::finish) once the input ends to validate the tail and
/// reassemble the collection.
#[derive(Debug)]
pub struct StreamingFeatureParser {
    buf: Vec<u8>,
    pos: usize,
    state: State,
    scan: Option<Scan>,
    key: Option<String>,
    header: Header,
    emitted: usize,
}

impl Default for StreamingFeatureParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingFeatureParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            state: State::Start,
            scan: None,
            key: None,
            header: Header::default(),
            emitted: 0,
        }
    }

    /// Number of features emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Bytes currently retained by the parser (the unfinished tail).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed one chunk of input and collect every feature it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Feature>, Error> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            if let Some(mut scan) = self.scan.take() {
                match scan.advance(&self.buf, &mut self.pos) {
                    Some(end) => {
                        let start = scan.start;
                        self.complete_value(start, end, &mut out)?;
                    }
                    None => {
                        self.scan = Some(scan);
                        break;
                    }
                }
                continue;
            }

            self.skip_whitespace();
            let Some(&b) = self.buf.get(self.pos) else {
                break;
            };
            self.step(b)?;
        }

        self.compact();
        Ok(out)
    }

    /// Validate that the document ended cleanly and reassemble it.
    ///
    /// `features` is the caller's accumulated, call-order sequence of
    /// everything [`push`](Self::push) returned.
    pub fn finish(mut self, features: Vec<Feature>) -> Result<FeatureCollection, Error> {
        self.skip_whitespace();
        if self.state != State::Done || self.scan.is_some() {
            return Err(Error::parse(format!(
                "unexpected end of stream after {} features",
                self.emitted
            )));
        }
        if !self.header.saw_features {
            return Err(Error::parse("missing `features` member"));
        }
        if features.len() != self.emitted {
            return Err(Error::parse(format!(
                "feature count mismatch: parser emitted {}, caller kept {}",
                self.emitted,
                features.len()
            )));
        }
        Ok(FeatureCollection {
            kind: self.header.kind.unwrap_or_default(),
            features,
            name: self.header.name.take(),
            crs: self.header.crs.take(),
            bbox: self.header.bbox.take(),
        })
    }

    // ── Structural steps ─────────────────────────────────────────────

    fn step(&mut self, b: u8) -> Result<(), Error> {
        match (self.state, b) {
            (State::Start, b'{') => {
                self.pos += 1;
                self.state = State::Key { first: true };
            }
            (State::Key { first: true }, b'}') => {
                self.pos += 1;
                self.state = State::Done;
            }
            (State::Key { .. }, b'"')
            | (State::Value, _)
            | (State::Element { .. }, b'{') => {
                self.scan = Some(Scan::begin(b, self.pos));
            }
            (State::Colon, b':') => {
                self.pos += 1;
                self.state = if self.key.as_deref() == Some("features") {
                    State::FeaturesOpen
                } else {
                    State::Value
                };
            }
            (State::FeaturesOpen, b'[') => {
                self.pos += 1;
                self.header.saw_features = true;
                self.state = State::Element { first: true };
            }
            (State::Element { first: true } | State::AfterElement, b']') => {
                self.pos += 1;
                self.state = State::AfterMember;
            }
            (State::AfterElement, b',') => {
                self.pos += 1;
                self.state = State::Element { first: false };
            }
            (State::AfterMember, b',') => {
                self.pos += 1;
                self.state = State::Key { first: false };
            }
            (State::AfterMember, b'}') => {
                self.pos += 1;
                self.state = State::Done;
            }
            (state, other) => {
                return Err(Error::parse(format!(
                    "unexpected byte {:?} in state {state:?} after {} features",
                    char::from(other),
                    self.emitted
                )));
            }
        }
        Ok(())
    }

    fn complete_value(&mut self, start: usize, end: usize, out: &mut Vec<Feature>) -> Result<(), Error> {
        let buf = std::mem::take(&mut self.buf);
        let result = match buf.get(start..end) {
            Some(raw) => self.apply_value(raw, out),
            None => Err(Error::parse("scanner offset out of range")),
        };
        self.buf = buf;
        result
    }

    fn apply_value(&mut self, raw: &[u8], out: &mut Vec<Feature>) -> Result<(), Error> {
        match self.state {
            State::Key { .. } => {
                let key: String =
                    serde_json::from_slice(raw).map_err(|e| Error::parse(format!("member name: {e}")))?;
                trace!(key, "collection member");
                self.key = Some(key);
                self.state = State::Colon;
            }
            State::Value => {
                self.capture_member(raw)?;
                self.state = State::AfterMember;
            }
            State::Element { .. } => {
                let feature: Feature = serde_json::from_slice(raw).map_err(|e| {
                    Error::parse(format!("feature #{}: {e}", self.emitted + 1))
                })?;
                self.emitted += 1;
                out.push(feature);
                self.state = State::AfterElement;
            }
            state => {
                return Err(Error::parse(format!("value completed in state {state:?}")));
            }
        }
        Ok(())
    }

    fn capture_member(&mut self, raw: &[u8]) -> Result<(), Error> {
        let key = self.key.take().unwrap_or_default();
        let bad = |e: serde_json::Error| Error::parse(format!("member `{key}`: {e}"));
        match key.as_str() {
            "type" => self.header.kind = Some(serde_json::from_slice(raw).map_err(bad)?),
            "name" => self.header.name = serde_json::from_slice(raw).map_err(bad)?,
            "crs" => self.header.crs = Some(serde_json::from_slice(raw).map_err(bad)?),
            "bbox" => self.header.bbox = serde_json::from_slice(raw).map_err(bad)?,
            _ => {
                // Foreign members must still be well-formed JSON.
                let _: serde::de::IgnoredAny = serde_json::from_slice(raw).map_err(bad)?;
                debug!(member = %key, "ignoring foreign collection member");
            }
        }
        Ok(())
    }

    // ── Buffer management ────────────────────────────────────────────

    fn skip_whitespace(&mut self) {
        while matches!(self.buf.get(self.pos), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    /// Drop every byte before the unfinished value (or the cursor).
    fn compact(&mut self) {
        let keep_from = self.scan.map_or(self.pos, |s| s.start);
        if keep_from == 0 {
            return;
        }
        self.buf.drain(..keep_from);
        self.pos -= keep_from;
        if let Some(scan) = self.scan.as_mut() {
            scan.start = 0;
        }
    }
}

/// Drive a [`StreamingFeatureParser`] over an async byte stream.
///
/// `on_feature` fires once per feature as soon as it is complete, with the
/// running count; `on_progress` fires after each chunk that completed at
/// least one feature. Cancellation stops parsing and rejects with
/// [`Error::Cancelled`]; no partial collection is returned.
pub async fn parse_stream<S, F, P>(
    stream: S,
    cancel: Option<&CancellationToken>,
    mut on_feature: F,
    mut on_progress: P,
) -> Result<FeatureCollection, Error>
where
    S: Stream<Item = Result<Bytes, Error>>,
    F: FnMut(&Feature, usize),
    P: FnMut(usize),
{
    let mut parser = StreamingFeatureParser::new();
    let mut features = Vec::new();
    let never = CancellationToken::new();
    let cancel = cancel.unwrap_or(&never);
    let mut stream = std::pin::pin!(stream);

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = next else {
            break;
        };
        let completed = parser.push(&chunk?)?;
        if completed.is_empty() {
            continue;
        }
        for feature in completed {
            on_feature(&feature, features.len() + 1);
            features.push(feature);
        }
        on_progress(features.len());
    }

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    parser.finish(features)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::stream;
    use pretty_assertions::assert_eq;

    const DOC: &str = r#"{
        "type": "FeatureCollection",
        "name": "rivers",
        "crs": { "type": "name", "properties": { "name": "EPSG:4326" } },
        "features": [
            { "type": "Feature", "geometry": { "type": "Point", "coordinates": [1, 2] }, "properties": { "label": "a \"quoted\" }{ name" } },
            { "type": "Feature", "geometry": { "type": "LineString", "coordinates": [[0, 0], [1, 1], [2, 0]] }, "properties": { "n": -1.5e3 } },
            { "type": "Feature", "geometry": null, "properties": null }
        ],
        "generator": [1, 2, {"x": "]"}]
    }"#;

    fn parse_in_chunks(doc: &str, size: usize) -> Result<FeatureCollection, Error> {
        let mut parser = StreamingFeatureParser::new();
        let mut all = Vec::new();
        for chunk in doc.as_bytes().chunks(size) {
            all.extend(parser.push(chunk)?);
        }
        parser.finish(all)
    }

    #[test]
    fn matches_whole_document_parse_at_every_chunk_size() {
        let expected = FeatureCollection::from_slice(DOC.as_bytes()).unwrap();
        for size in [1, 2, 3, 7, 16, 64, DOC.len()] {
            let parsed = parse_in_chunks(DOC, size).unwrap();
            assert_eq!(parsed, expected, "chunk size {size}");
        }
    }

    #[test]
    fn captures_scalar_members() {
        let fc = parse_in_chunks(DOC, 5).unwrap();
        assert_eq!(fc.name.as_deref(), Some("rivers"));
        assert_eq!(fc.crs.unwrap()["properties"]["name"], "EPSG:4326");
        assert_eq!(fc.features.len(), 3);
    }

    #[test]
    fn features_member_first_then_metadata() {
        let doc = r#"{"features":[{"type":"Feature","geometry":null,"properties":{}}],"type":"FeatureCollection","name":"late"}"#;
        let fc = parse_in_chunks(doc, 4).unwrap();
        assert_eq!(fc.len(), 1);
        assert_eq!(fc.name.as_deref(), Some("late"));
    }

    #[test]
    fn empty_features_array() {
        let fc = parse_in_chunks(r#"{"type":"FeatureCollection","features":[]}"#, 3).unwrap();
        assert!(fc.is_empty());
    }

    #[test]
    fn emits_each_feature_once_complete_and_drops_it() {
        let mut parser = StreamingFeatureParser::new();
        let head = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":null,"properties":{}}"#;
        let out = parser.push(head.as_bytes()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(parser.emitted(), 1);
        // Everything up to the emitted feature has been released.
        assert_eq!(parser.buffered(), 0);

        let out = parser.push(br#",{"type":"Feature","geometry":nu"#).unwrap();
        assert!(out.is_empty());
        assert!(parser.buffered() > 0);
    }

    #[test]
    fn truncated_stream_fails_at_finish() {
        let truncated = &DOC[..DOC.len() / 2];
        let err = parse_in_chunks(truncated, 8).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }), "got {err:?}");
    }

    #[test]
    fn malformed_feature_fails_on_push() {
        let doc = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"Blob"},"properties":{}}]}"#;
        assert!(parse_in_chunks(doc, 10).is_err());
    }

    #[test]
    fn trailing_comma_is_rejected() {
        let doc = r#"{"type":"FeatureCollection","features":[],}"#;
        assert!(parse_in_chunks(doc, 10).is_err());
    }

    #[test]
    fn garbage_after_document_is_rejected() {
        let doc = r#"{"type":"FeatureCollection","features":[]} x"#;
        assert!(parse_in_chunks(doc, 10).is_err());
    }

    #[test]
    fn missing_features_member_is_rejected() {
        assert!(parse_in_chunks(r#"{"type":"FeatureCollection"}"#, 10).is_err());
    }

    #[tokio::test]
    async fn parse_stream_reports_features_in_order() {
        let chunks: Vec<Result<Bytes, Error>> = DOC
            .as_bytes()
            .chunks(11)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let mut seen = Vec::new();
        let mut progress = Vec::new();
        let fc = parse_stream(
            stream::iter(chunks),
            None,
            |f, n| seen.push((n, f.geometry.is_some())),
            |n| progress.push(n),
        )
        .await
        .unwrap();

        assert_eq!(fc.len(), 3);
        assert_eq!(seen, vec![(1, true), (2, true), (3, false)]);
        assert_eq!(progress.last(), Some(&3));
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn parse_stream_rejects_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let chunks = vec![Ok(Bytes::from_static(DOC.as_bytes()))];
        let err = parse_stream(stream::iter(chunks), Some(&token), |_, _| {}, |_| {})
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn parse_stream_propagates_transport_errors() {
        let chunks = vec![
            Ok(Bytes::from_static(b"{\"type\":")),
            Err(Error::Timeout { timeout_ms: 10 }),
        ];
        let err = parse_stream(stream::iter(chunks), None, |_, _| {}, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
