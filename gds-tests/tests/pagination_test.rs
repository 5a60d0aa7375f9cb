use anyhow::Result;
use gds_api::{BackendErrorKind, Cursor, Offset, QueryParams, Value};
use gds_test_utils::{book_schema, titles, TestStore};

fn expected(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("Book {}", i)).collect()
}

/// Repeated fetch_page calls walk disjoint, contiguous pages until empty
#[test]
fn test_pages_are_contiguous_and_disjoint() -> Result<()> {
    let mut ts = TestStore::books();
    ts.add_books(12);

    let page1 = ts.store.fetch_page(5, None)?;
    assert_eq!(titles(&page1), expected(0..5));
    assert!(ts.store.cursor().is_some());

    let page2 = ts.store.fetch_page(5, None)?;
    assert_eq!(titles(&page2), expected(5..10));

    let page3 = ts.store.fetch_page(5, None)?;
    assert_eq!(titles(&page3), expected(10..12));

    assert!(ts.store.fetch_page(5, None)?.is_empty());
    assert!(ts.store.fetch_page(5, None)?.is_empty());
    Ok(())
}

#[test]
fn test_empty_kind_pages_empty() -> Result<()> {
    let mut ts = TestStore::books();
    assert!(ts.store.fetch_page(10, None)?.is_empty());
    Ok(())
}

/// Offset by count and offset by cursor land on the same rows
#[test]
fn test_offset_and_cursor_equivalence() -> Result<()> {
    let mut ts = TestStore::books();
    ts.add_books(12);

    ts.store.fetch_page(5, None)?;
    let cursor = ts.store.cursor().cloned().expect("cursor after first page");

    let by_count = ts.store.fetch_page(4, Some(Offset::Count(5)))?;
    let by_cursor = ts.store.fetch_page(4, Some(Offset::Cursor(cursor)))?;

    assert_eq!(titles(&by_count), expected(5..9));
    assert_eq!(titles(&by_count), titles(&by_cursor));
    Ok(())
}

#[test]
fn test_query_resets_paging() -> Result<()> {
    let mut ts = TestStore::books();
    ts.add_books(6);

    ts.store.fetch_page(4, None)?;
    let restarted = ts
        .store
        .query("SELECT * FROM `Book` ORDER BY __key__ ASC", QueryParams::new())
        .fetch_page(4, None)?;
    assert_eq!(titles(&restarted), expected(0..4));
    Ok(())
}

/// A cursor saved by one Store resumes paging in another
#[test]
fn test_set_cursor_resumes_in_new_store() -> Result<()> {
    let mut ts = TestStore::books();
    ts.add_books(10);

    ts.store.fetch_page(3, None)?;
    let saved = ts.store.cursor().map(|c| c.as_str().to_string()).unwrap();

    let mut resumed = ts.sibling(book_schema());
    resumed.set_cursor(saved);
    let page = resumed.fetch_page(3, None)?;
    assert_eq!(titles(&page), expected(3..6));
    Ok(())
}

#[test]
fn test_paging_filtered_query() -> Result<()> {
    let mut ts = TestStore::books();
    for i in 0..7 {
        let author = if i % 2 == 0 { "Herbert" } else { "Austen" };
        ts.add_book(&format!("Book {}", i), author);
    }

    let mut params = QueryParams::new();
    params.insert("a".to_string(), Value::string("Herbert"));
    ts.store
        .query("SELECT * FROM Book WHERE author = @a ORDER BY __key__ ASC", params);

    let first = ts.store.fetch_page(3, None)?;
    let second = ts.store.fetch_page(3, None)?;
    assert_eq!(titles(&first), vec!["Book 0", "Book 2", "Book 4"]);
    assert_eq!(titles(&second), vec!["Book 6"]);
    Ok(())
}

#[test]
fn test_invalid_cursor_is_backend_error() {
    let mut ts = TestStore::books();
    ts.add_books(2);

    let err = ts
        .store
        .fetch_page(2, Some(Offset::Cursor(Cursor::new("garbage!"))))
        .unwrap_err();
    assert_eq!(
        err.backend_error().map(|e| e.kind),
        Some(BackendErrorKind::InvalidArgument)
    );
}
