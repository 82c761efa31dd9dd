//! Source store access: the HTTP query/write client and the paged extractor

mod client;
mod extractor;

pub use client::{
    classify_write, quote_ident, ChunkedResponse, InfluxClient, QueryResponse, Series,
    StatementResult, RETENTION_SKIP_MARKER,
};
pub use extractor::{decode_page, decode_row, EntityPages, Extractor, FieldSchema, TimeFilter};
