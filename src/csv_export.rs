//! Streamed CSV rendering of metric values.
//!
//! [CsvChunks] yields one encoded CSV record per item so that the response body is produced
//! lazily as the client reads it.

use axum::{
    body::StreamBody,
    http::header::{self, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use hashbrown::HashSet;

use crate::error::RefError;
use crate::models::{AnnotatedScalarValue, DetectionSummary, IndexValue, SeriesValue};
use crate::sanitize::sanitize_float;

static HEADER_HAD_OUTLIERS: HeaderName = HeaderName::from_static("x-ref-had-outliers");
static HEADER_OUTLIER_COUNT: HeaderName = HeaderName::from_static("x-ref-outlier-count");

const INDEX_NAME_DEFAULT: &str = "index";

/// Encode a single CSV record.
fn encode<I, T>(record: I) -> Result<Bytes, csv::Error>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(record)?;
    let data = writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))?;
    Ok(Bytes::from(data))
}

/// Format a float cell. Non-finite and missing values are empty.
fn float_cell(value: Option<f64>) -> String {
    match value.and_then(sanitize_float) {
        Some(value) => format!("{value:?}"),
        None => String::new(),
    }
}

fn index_cell(index: Option<&IndexValue>, position: usize) -> String {
    match index {
        Some(IndexValue::Int(value)) => value.to_string(),
        Some(IndexValue::Float(value)) => float_cell(Some(*value)),
        Some(IndexValue::Str(value)) => value.clone(),
        None => position.to_string(),
    }
}

enum State {
    Start,
    Scalars,
    Series,
    SeriesRows {
        value: SeriesValue,
        keys: Vec<String>,
        position: usize,
    },
    Done,
}

/// Lazy sequence of CSV chunks for scalar and series values.
///
/// Scalar rows come first under a single header built from the first scalar value's sorted
/// dimension keys. Each series is flattened to one row per element and is preceded by its own
/// header the first time that header appears in the output. Empty input yields one empty chunk.
pub struct CsvChunks {
    state: State,
    scalars: std::iter::Peekable<std::vec::IntoIter<AnnotatedScalarValue>>,
    series: std::vec::IntoIter<SeriesValue>,
    detection_ran: bool,
    scalar_keys: Vec<String>,
    series_headers: HashSet<Vec<String>>,
}

impl CsvChunks {
    /// Returns a new CsvChunks.
    ///
    /// `detection_ran` adds the `is_outlier` and `verification_status` columns to scalar rows.
    pub fn new(
        scalars: Vec<AnnotatedScalarValue>,
        series: Vec<SeriesValue>,
        detection_ran: bool,
    ) -> Self {
        CsvChunks {
            state: State::Start,
            scalars: scalars.into_iter().peekable(),
            series: series.into_iter(),
            detection_ran,
            scalar_keys: Vec::new(),
            series_headers: HashSet::new(),
        }
    }

    fn scalar_header(&self) -> Vec<String> {
        let mut header = self.scalar_keys.clone();
        header.extend(["value".to_string(), "type".to_string()]);
        if self.detection_ran {
            header.extend(["is_outlier".to_string(), "verification_status".to_string()]);
        }
        header
    }

    fn scalar_row(&self, annotated: &AnnotatedScalarValue) -> Vec<String> {
        let value = &annotated.value;
        let mut row: Vec<String> = self
            .scalar_keys
            .iter()
            .map(|key| value.dimensions.get(key).cloned().unwrap_or_default())
            .collect();
        row.push(float_cell(Some(value.value)));
        row.push("scalar".to_string());
        if self.detection_ran {
            row.push(
                annotated
                    .is_outlier
                    .map(|flag| flag.to_string())
                    .unwrap_or_default(),
            );
            row.push(
                annotated
                    .verification_status
                    .map(|status| status.to_string())
                    .unwrap_or_default(),
            );
        }
        row
    }
}

fn series_header(keys: &[String]) -> Vec<String> {
    let mut header = keys.to_vec();
    header.extend(
        ["value", "index", "index_name", "type"]
            .iter()
            .map(|column| column.to_string()),
    );
    header
}

fn series_row(value: &SeriesValue, keys: &[String], position: usize) -> Vec<String> {
    let mut row: Vec<String> = keys
        .iter()
        .map(|key| value.dimensions.get(key).cloned().unwrap_or_default())
        .collect();
    row.push(float_cell(value.values[position]));
    row.push(index_cell(
        value.index.as_ref().and_then(|index| index.get(position)),
        position,
    ));
    row.push(
        value
            .index_name
            .clone()
            .unwrap_or_else(|| INDEX_NAME_DEFAULT.to_string()),
    );
    row.push("series".to_string());
    row
}

impl Iterator for CsvChunks {
    type Item = Result<Bytes, csv::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                State::Start => {
                    if self.scalars.peek().is_none() && self.series.len() == 0 {
                        self.state = State::Done;
                        return Some(Ok(Bytes::new()));
                    }
                    match self.scalars.peek() {
                        Some(first) => {
                            // BTreeMap keys are sorted.
                            self.scalar_keys = first.value.dimensions.keys().cloned().collect();
                            self.state = State::Scalars;
                            return Some(encode(self.scalar_header()));
                        }
                        None => self.state = State::Series,
                    }
                }
                State::Scalars => match self.scalars.next() {
                    Some(annotated) => return Some(encode(self.scalar_row(&annotated))),
                    None => self.state = State::Series,
                },
                State::Series => match self.series.next() {
                    Some(value) => {
                        let keys: Vec<String> = value.dimensions.keys().cloned().collect();
                        let header = series_header(&keys);
                        self.state = State::SeriesRows {
                            value,
                            keys,
                            position: 0,
                        };
                        if self.series_headers.insert(header.clone()) {
                            return Some(encode(header));
                        }
                    }
                    None => self.state = State::Done,
                },
                State::SeriesRows {
                    value,
                    keys,
                    position,
                } => {
                    if *position < value.values.len() {
                        let row = series_row(value, keys, *position);
                        *position += 1;
                        return Some(encode(row));
                    }
                    self.state = State::Series;
                }
                State::Done => return None,
            }
        }
    }
}

/// Build a streamed CSV attachment response.
///
/// Outlier headers are set only when `summary` is present, i.e. detection ran.
pub fn csv_response(
    chunks: CsvChunks,
    filename: &str,
    summary: Option<DetectionSummary>,
) -> Result<Response, RefError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/csv; charset=utf-8"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename={filename}"))?,
    );
    if let Some(summary) = summary {
        headers.insert(
            HEADER_HAD_OUTLIERS.clone(),
            HeaderValue::from_static(if summary.had_outliers { "true" } else { "false" }),
        );
        headers.insert(
            HEADER_OUTLIER_COUNT.clone(),
            HeaderValue::from(summary.outlier_count),
        );
    }
    let body = StreamBody::new(tokio_stream::iter(chunks));
    Ok((headers, body).into_response())
}
