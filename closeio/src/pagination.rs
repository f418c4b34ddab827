//! Lazy pagination over the Close API's two paging styles.
//!
//! Most list endpoints page by offset (`_skip` + `_limit`, continue while `has_more`). The event
//! log pages by opaque cursor (`_cursor` + `_limit`, continue while `cursor_next` is non-empty).
//! Both paginators return a single stream of items: a page is fetched only when the consumer
//! polls past the last buffered item, and dropping the stream stops fetching.

use std::future::Future;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{Error, Result};

/// Items requested per offset page.
pub const OFFSET_PAGE_LIMIT: usize = 100;

/// Items requested per cursor page.
pub const CURSOR_PAGE_LIMIT: usize = 50;

/// Paging parameters handed to an offset fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetParams {
    pub skip: usize,
    pub limit: usize,
}

impl OffsetParams {
    /// Query string pairs in the form the API expects.
    pub fn query(&self) -> [(&'static str, String); 2] {
        [("_skip", self.skip.to_string()), ("_limit", self.limit.to_string())]
    }
}

/// Paging parameters handed to a cursor fetch. The first fetch carries an empty cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorParams {
    pub cursor: String,
    pub limit: usize,
}

impl CursorParams {
    pub fn query(&self) -> [(&'static str, String); 2] {
        [("_cursor", self.cursor.clone()), ("_limit", self.limit.to_string())]
    }
}

/// One page of an offset-paged resource.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetPage {
    pub data: Vec<Value>,
    pub has_more: bool,
}

impl TryFrom<Value> for OffsetPage {
    type Error = Error;

    fn try_from(body: Value) -> Result<Self> {
        let mut page = into_object(body, "offset")?;
        let data = take_data(&mut page, "offset")?;
        let has_more = match page.get("has_more") {
            Some(Value::Bool(b)) => *b,
            Some(other) => return Err(Error::protocol(format!("`has_more` must be a boolean, got {other}"))),
            None => return Err(Error::protocol("offset page is missing `has_more`")),
        };
        Ok(Self { data, has_more })
    }
}

/// One page of a cursor-paged resource. An empty `cursor_next` marks the last page.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPage {
    pub data: Vec<Value>,
    pub cursor_next: String,
}

impl TryFrom<Value> for CursorPage {
    type Error = Error;

    fn try_from(body: Value) -> Result<Self> {
        let mut page = into_object(body, "cursor")?;
        let data = take_data(&mut page, "cursor")?;
        let cursor_next = match page.remove("cursor_next") {
            Some(Value::String(s)) => s,
            Some(Value::Null) => String::new(),
            Some(other) => return Err(Error::protocol(format!("`cursor_next` must be a string, got {other}"))),
            None => return Err(Error::protocol("cursor page is missing `cursor_next`")),
        };
        Ok(Self { data, cursor_next })
    }
}

fn into_object(body: Value, kind: &str) -> Result<Map<String, Value>> {
    match body {
        Value::Object(map) => Ok(map),
        other => Err(Error::protocol(format!("{kind} page must be a JSON object, got {other}"))),
    }
}

fn take_data(page: &mut Map<String, Value>, kind: &str) -> Result<Vec<Value>> {
    match page.remove("data") {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(Error::protocol(format!("{kind} page `data` must be an array"))),
        None => Err(Error::protocol(format!("{kind} page is missing `data`"))),
    }
}

/// Stream every item of an offset-paged resource.
///
/// `fetch` is called with `skip = 0, 100, 200, ...` until a page reports `has_more: false`. A
/// fetch error or malformed page is yielded once and ends the stream.
pub fn paginate<'a, F, Fut>(fetch: F) -> BoxStream<'a, Result<Value>>
where
    F: FnMut(OffsetParams) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Value>> + Send + 'a,
{
    stream::try_unfold(Some((fetch, 0usize)), |state| async move {
        let Some((mut fetch, skip)) = state else {
            return Ok(None);
        };

        debug!(skip, limit = OFFSET_PAGE_LIMIT, "Fetching offset page");
        let page = OffsetPage::try_from(
            fetch(OffsetParams {
                skip,
                limit: OFFSET_PAGE_LIMIT,
            })
            .await?,
        )?;

        let next = page.has_more.then_some((fetch, skip + OFFSET_PAGE_LIMIT));
        Ok::<_, Error>(Some((page.data, next)))
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}

/// Stream every item of a cursor-paged resource.
///
/// The cursor is opaque: it is passed back verbatim and only compared against the empty string.
/// A `null` `cursor_next` also ends the stream.
pub fn paginate_via_cursor<'a, F, Fut>(fetch: F) -> BoxStream<'a, Result<Value>>
where
    F: FnMut(CursorParams) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Value>> + Send + 'a,
{
    stream::try_unfold(Some((fetch, String::new())), |state| async move {
        let Some((mut fetch, cursor)) = state else {
            return Ok(None);
        };

        debug!(cursor = %cursor, limit = CURSOR_PAGE_LIMIT, "Fetching cursor page");
        let page = CursorPage::try_from(
            fetch(CursorParams {
                cursor,
                limit: CURSOR_PAGE_LIMIT,
            })
            .await?,
        )?;

        let next = (!page.cursor_next.is_empty()).then_some((fetch, page.cursor_next));
        Ok::<_, Error>(Some((page.data, next)))
    })
    .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}
