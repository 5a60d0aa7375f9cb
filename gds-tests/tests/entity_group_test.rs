use anyhow::Result;
use gds_api::{Entity, Error, QueryParams, Schema, Store, Value};
use gds_test_utils::{titles, TestStore};

fn author_schema() -> Schema {
    Schema::new("Author").unwrap().add_string("name")
}

fn author(store: &mut Store, name: &str) -> Result<Entity> {
    let mut author = store.create_entity([("name", name)])?;
    author.set_key_name(name.to_lowercase())?;
    store.upsert(&mut author)?;
    Ok(author)
}

fn child_book(ts: &mut TestStore, parent: &Entity, title: &str) -> Result<Entity> {
    let mut book = ts.store.create_entity([("title", title)])?;
    book.set_ancestry(parent)?;
    ts.store.upsert(&mut book)?;
    Ok(book)
}

#[test]
fn test_child_key_carries_ancestor_path() -> Result<()> {
    let mut ts = TestStore::books();
    let mut authors = ts.sibling(author_schema());
    let herbert = author(&mut authors, "Herbert")?;

    let dune = child_book(&mut ts, &herbert, "Dune")?;
    let key = dune.key();
    assert!(key.is_complete());
    assert_eq!(key.parent(), Some(herbert.key()));
    assert!(key.has_ancestor(&herbert.key()));
    Ok(())
}

#[test]
fn test_fetch_entity_group() -> Result<()> {
    let mut ts = TestStore::books();
    let mut authors = ts.sibling(author_schema());
    let herbert = author(&mut authors, "Herbert")?;
    let austen = author(&mut authors, "Austen")?;

    child_book(&mut ts, &herbert, "Dune")?;
    child_book(&mut ts, &austen, "Emma")?;
    child_book(&mut ts, &herbert, "Dune Messiah")?;
    ts.add_book("Orphan", "Nobody");

    let group = ts.store.fetch_entity_group(&herbert)?;
    assert_eq!(titles(&group), vec!["Dune", "Dune Messiah"]);
    assert!(group.iter().all(|b| b.ancestry() == Some(&herbert.key())));
    assert!(ts.store.cursor().is_some());

    let group = ts.store.fetch_entity_group(&austen)?;
    assert_eq!(titles(&group), vec!["Emma"]);
    Ok(())
}

/// Hydrated children keep their ancestry, so re-upserting updates in place
#[test]
fn test_fetched_child_upserts_in_place() -> Result<()> {
    let mut ts = TestStore::books();
    let mut authors = ts.sibling(author_schema());
    let herbert = author(&mut authors, "Herbert")?;
    child_book(&mut ts, &herbert, "Dune")?;

    let mut dune = ts.store.fetch_entity_group(&herbert)?.remove(0);
    dune.set("pages", 412)?;
    ts.store.upsert(&mut dune)?;

    assert_eq!(ts.stored_count(), 2);
    let group = ts.store.fetch_entity_group(&herbert)?;
    assert_eq!(group[0].get("pages")?, Some(&Value::Integer(412)));
    Ok(())
}

#[test]
fn test_unsaved_ancestor_rejected() -> Result<()> {
    let mut ts = TestStore::books();
    let authors = ts.sibling(author_schema());
    let unsaved = authors.new_entity();

    assert!(matches!(
        ts.store.fetch_entity_group(&unsaved),
        Err(Error::InvalidKey(_))
    ));

    let mut book = ts.store.new_entity();
    assert!(matches!(book.set_ancestry(&unsaved), Err(Error::InvalidKey(_))));
    Ok(())
}

/// A single-group transaction may write several children of one root
#[test]
fn test_transaction_within_one_group() -> Result<()> {
    let mut ts = TestStore::books();
    let mut authors = ts.sibling(author_schema());
    let herbert = author(&mut authors, "Herbert")?;

    let mut books = Vec::new();
    for title in ["Dune", "Dune Messiah", "Children of Dune"] {
        let mut book = ts.store.create_entity([("title", title)])?;
        book.set_ancestry(&herbert)?;
        books.push(book);
    }

    ts.store.begin_transaction(false)?;
    let before = ts.store.fetch_entity_group(&herbert)?;
    assert!(before.is_empty());
    ts.store.upsert_many(&mut books)?;

    assert_eq!(ts.store.fetch_entity_group(&herbert)?.len(), 3);
    Ok(())
}

/// Entity-valued query parameters are sent as keys
#[test]
fn test_entity_parameter_matches_key_property() -> Result<()> {
    let mut ts = TestStore::books();
    let mut series_store = ts.sibling(Schema::new("Series")?.add_string("name"));

    let mut dune_series = series_store.create_entity([("name", "Dune")])?;
    series_store.upsert(&mut dune_series)?;

    for title in ["Dune", "Dune Messiah"] {
        let mut book = ts.store.create_entity([("title", title)])?;
        book.set("series", dune_series.key())?;
        ts.store.upsert(&mut book)?;
    }
    ts.add_book("Emma", "Austen");

    let mut params = QueryParams::new();
    params.insert("s".to_string(), Value::from(dune_series.clone()));
    let found = ts
        .store
        .query("SELECT * FROM Book WHERE series = @s", params)
        .fetch_all()?;
    assert_eq!(titles(&found), vec!["Dune", "Dune Messiah"]);
    Ok(())
}
