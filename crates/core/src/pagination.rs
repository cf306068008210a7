//! Lazy, bounded-memory pagination primitives.
//!
//! Both page streams are forward-only and finite: they end on the first empty
//! page (or right after yielding a fetch error). Re-reading requires building a
//! fresh stream with the same starting point. At most one page is buffered.

use core::convert::Infallible;

/// Page stream driven by a `(page_index, page_size) -> page` fetch function.
///
/// `page_index` starts at the given value and increments after every yielded page.
pub struct OffsetPages<T, E, F>
where
    F: FnMut(usize, usize) -> Result<Vec<T>, E>,
{
    fetch: F,
    page_index: usize,
    page_size: usize,
    pending: Option<Result<Vec<T>, E>>,
    done: bool,
}

impl<T, E, F> OffsetPages<T, E, F>
where
    F: FnMut(usize, usize) -> Result<Vec<T>, E>,
{
    pub fn new(page_index: usize, page_size: usize, fetch: F) -> Self {
        Self {
            fetch,
            page_index,
            page_size,
            pending: None,
            done: false,
        }
    }

    /// Whether another page is available; fetches it if nothing is buffered.
    pub fn has_next_page(&mut self) -> bool {
        if self.done {
            return false;
        }

        let pending = self
            .pending
            .get_or_insert_with(|| (self.fetch)(self.page_index, self.page_size));

        if matches!(pending, Ok(items) if items.is_empty()) {
            self.pending = None;
            self.done = true;
            return false;
        }

        true
    }

    pub fn next_page(&mut self) -> Option<Result<Vec<T>, E>> {
        if !self.has_next_page() {
            return None;
        }

        match self.pending.take()? {
            Ok(items) => {
                self.page_index += 1;
                Some(Ok(items))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<T, E, F> Iterator for OffsetPages<T, E, F>
where
    F: FnMut(usize, usize) -> Result<Vec<T>, E>,
{
    type Item = Result<Vec<T>, E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_page()
    }
}

/// Page stream driven by a `cursor -> (next_cursor, page)` fetch function.
///
/// The returned `next_cursor` is fed into the following fetch. The stream
/// stops when a fetch returns an empty page, whether or not the cursor moved.
/// This matches `WHERE id > $cursor ORDER BY id ASC LIMIT $n` queries.
pub struct CursorPages<C, T, E, F>
where
    C: Clone,
    F: FnMut(C) -> Result<(C, Vec<T>), E>,
{
    fetch: F,
    cursor: C,
    pending: Option<Result<(C, Vec<T>), E>>,
    done: bool,
}

impl<C, T, E, F> CursorPages<C, T, E, F>
where
    C: Clone,
    F: FnMut(C) -> Result<(C, Vec<T>), E>,
{
    pub fn new(cursor: C, fetch: F) -> Self {
        Self {
            fetch,
            cursor,
            pending: None,
            done: false,
        }
    }

    /// Cursor the next fetch will start from.
    pub fn cursor(&self) -> &C {
        &self.cursor
    }

    /// Whether another page is available; fetches it if nothing is buffered.
    pub fn has_next_page(&mut self) -> bool {
        if self.done {
            return false;
        }

        if self.pending.is_none() {
            self.pending = Some((self.fetch)(self.cursor.clone()));
        }

        if matches!(&self.pending, Some(Ok((_, items))) if items.is_empty()) {
            self.pending = None;
            self.done = true;
            return false;
        }

        true
    }

    pub fn next_page(&mut self) -> Option<Result<Vec<T>, E>> {
        if !self.has_next_page() {
            return None;
        }

        match self.pending.take()? {
            Ok((next_cursor, items)) => {
                self.cursor = next_cursor;
                Some(Ok(items))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<C, T, E, F> Iterator for CursorPages<C, T, E, F>
where
    C: Clone,
    F: FnMut(C) -> Result<(C, Vec<T>), E>,
{
    type Item = Result<Vec<T>, E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_page()
    }
}

/// Split an owned list into an offset-paged stream of `page_size` pages.
pub fn partition<T: Clone>(
    items: Vec<T>,
    page_size: usize,
) -> OffsetPages<T, Infallible, impl FnMut(usize, usize) -> Result<Vec<T>, Infallible>> {
    OffsetPages::new(0, page_size, move |page_index, page_size| {
        let start = page_index.saturating_mul(page_size).min(items.len());
        let end = start.saturating_add(page_size).min(items.len());
        Ok(items[start..end].to_vec())
    })
}

/// Flattening for fallible page streams.
pub trait PagesExt<T, E>: Iterator<Item = Result<Vec<T>, E>> + Sized {
    /// Yield the items of every page in order; a fetch error is yielded once
    /// and ends the stream.
    fn flatten_pages(self) -> FlattenPages<Self, T> {
        FlattenPages {
            pages: self,
            current: Vec::new().into_iter(),
            failed: false,
        }
    }
}

impl<I, T, E> PagesExt<T, E> for I where I: Iterator<Item = Result<Vec<T>, E>> {}

/// Item stream produced by [`PagesExt::flatten_pages`].
pub struct FlattenPages<I, T> {
    pages: I,
    current: std::vec::IntoIter<T>,
    failed: bool,
}

impl<I, T, E> Iterator for FlattenPages<I, T>
where
    I: Iterator<Item = Result<Vec<T>, E>>,
{
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                return Some(Ok(item));
            }
            if self.failed {
                return None;
            }
            match self.pages.next()? {
                Ok(page) => self.current = page.into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
