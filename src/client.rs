//! Client/DB/Collection facade (component N, supplemented): the
//! user-facing surface built on top of the pool, wire framing and handshake.
//!
//! One facade type per concern, each lower layer only reachable through
//! the one above it (`Client` owns the pool, `Database` and `Collection`
//! are views scoped by name, never holding connections themselves). The
//! cursor/`getMore` loop follows real MongoDB driver cursor
//! implementations: a cursor buffers one batch and transparently issues
//! `getMore` when it runs dry, until the server reports cursor id `0`.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::bson::{Document, Value, ValueRef};
use crate::config::ConnectionConfiguration;
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::wire::OpMsg;

fn with_db(mut command: Document, db: &str) -> Document {
    command.mutator().append("$db", &Value::Utf8(db.to_owned())).unwrap();
    command
}

/// Raises [`Error::Server`] if `reply`'s `ok` field is falsy, pulling
/// `code`/`errmsg` out if the server sent them.
fn check_ok(reply: &Document) -> Result<()> {
    let view = reply.view();
    let ok = match view.get("ok").map_err(Error::Bson)? {
        Some(el) => match ValueRef::from_element(&el).map_err(Error::Bson)? {
            ValueRef::Double(d) => d == 1.0,
            ValueRef::Int32(i) => i == 1,
            ValueRef::Bool(b) => b,
            _ => false,
        },
        None => false,
    };
    if ok {
        return Ok(());
    }
    let code = match view.get("code").ok().flatten() {
        Some(el) => match ValueRef::from_element(&el) {
            Ok(ValueRef::Int32(i)) => i,
            _ => -1,
        },
        None => -1,
    };
    let message = match view.get("errmsg").ok().flatten() {
        Some(el) => match ValueRef::from_element(&el) {
            Ok(ValueRef::Utf8(s)) => s.to_owned(),
            _ => String::new(),
        },
        None => "server reported ok: 0 with no errmsg".to_owned(),
    };
    Err(Error::Server { code, message })
}

/// The top-level handle: owns the connection pool for one server. Cheap to
/// clone, since it's only an `Arc` around the pool.
#[derive(Clone)]
pub struct Client {
    pool: Arc<Pool>,
}

impl Client {
    pub fn connect(config: ConnectionConfiguration) -> Result<Self> {
        debug!("connect(): {}:{}, tls {}", config.params.host, config.params.port, config.params.tls);
        Ok(Self { pool: Arc::new(Pool::new(config)?) })
    }

    /// Runs an arbitrary command against `db`, checking out a connection
    /// for exactly the duration of the call.
    pub async fn run_command(&self, db: &str, command: Document) -> Result<Document> {
        trace!("run_command(): against db {db}");
        let mut conn = self.pool.checkout().await?;
        let reply = conn.run_command(OpMsg::new(with_db(command, db))).await?;
        check_ok(&reply.body)?;
        Ok(reply.body)
    }

    #[must_use]
    pub fn database(&self, name: impl Into<String>) -> Database {
        Database { client: self.clone(), name: name.into() }
    }
}

pub struct Database {
    client: Client,
    name: String,
}

impl Database {
    pub async fn run_command(&self, command: Document) -> Result<Document> {
        self.client.run_command(&self.name, command).await
    }

    #[must_use]
    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection { db_name: self.name.clone(), client: self.client.clone(), name: name.into() }
    }

    /// Lists the names of every collection in this database, via
    /// `listCollections` with `nameOnly: true`.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let mut cmd = Document::empty();
        let mut m = cmd.mutator();
        m.append("listCollections", &Value::Int32(1)).unwrap();
        m.append("nameOnly", &Value::Bool(true)).unwrap();
        drop(m);
        let reply = self.run_command(cmd).await?;
        let cursor = first_batch_cursor(&reply)?;
        Ok(cursor
            .into_iter()
            .map(|doc| {
                let view = doc.view();
                view.get("name")
                    .ok()
                    .flatten()
                    .and_then(|el| ValueRef::from_element(&el).ok())
                    .and_then(|v| match v {
                        ValueRef::Utf8(s) => Some(s.to_owned()),
                        _ => None,
                    })
                    .unwrap_or_default()
            })
            .collect())
    }
}

/// Pulls `cursor.firstBatch` out of a command reply that embeds a cursor
/// (`find`, `aggregate`, `listCollections`, ...).
fn first_batch_cursor(reply: &Document) -> Result<Vec<Document>> {
    let view = reply.view();
    let cursor_el = view.get("cursor").map_err(Error::Bson)?.ok_or(Error::Protocol("reply had no cursor field"))?;
    let cursor_view = match ValueRef::from_element(&cursor_el).map_err(Error::Bson)? {
        ValueRef::Document(v) => v,
        _ => return Err(Error::Protocol("cursor field was not a document")),
    };
    let batch_el = cursor_view.get("firstBatch").map_err(Error::Bson)?.ok_or(Error::Protocol("cursor had no firstBatch"))?;
    match ValueRef::from_element(&batch_el).map_err(Error::Bson)? {
        ValueRef::Array(arr) => arr
            .iter()
            .map(|el| {
                let el = el.map_err(Error::Bson)?;
                match ValueRef::from_element(&el).map_err(Error::Bson)? {
                    ValueRef::Document(d) => Document::from_bytes(d.as_bytes()).map_err(Error::Bson),
                    _ => Err(Error::Protocol("firstBatch element was not a document")),
                }
            })
            .collect(),
        _ => Err(Error::Protocol("cursor.firstBatch was not an array")),
    }
}

pub struct Collection {
    client: Client,
    db_name: String,
    name: String,
}

impl Collection {
    pub async fn insert_one(&self, document: Document) -> Result<()> {
        let mut cmd = Document::empty();
        let mut m = cmd.mutator();
        m.append("insert", &Value::Utf8(self.name.clone())).unwrap();
        let mut docs = Document::empty();
        docs.mutator().append("0", &Value::Document(document)).unwrap();
        m.append("documents", &Value::Array(docs)).unwrap();
        drop(m);
        let reply = self.client.run_command(&self.db_name, cmd).await?;
        check_ok(&reply)
    }

    /// Runs `find` with `filter` and returns a [`Cursor`] over the results,
    /// transparently issuing `getMore` as the caller drains it.
    pub async fn find(&self, filter: Document) -> Result<Cursor> {
        let mut cmd = Document::empty();
        let mut m = cmd.mutator();
        m.append("find", &Value::Utf8(self.name.clone())).unwrap();
        m.append("filter", &Value::Document(filter)).unwrap();
        drop(m);
        let reply = self.client.run_command(&self.db_name, cmd).await?;
        Cursor::from_find_reply(self.client.clone(), self.db_name.clone(), self.name.clone(), &reply)
    }
}

/// A server-side cursor, drained one document at a time; issues `getMore`
/// once the current batch is exhausted and the server hasn't reported
/// cursor id `0` (fully consumed).
pub struct Cursor {
    client: Client,
    db_name: String,
    collection: String,
    cursor_id: i64,
    batch: VecDeque<Document>,
}

impl Cursor {
    fn from_find_reply(client: Client, db_name: String, collection: String, reply: &Document) -> Result<Self> {
        let view = reply.view();
        let cursor_el = view.get("cursor").map_err(Error::Bson)?.ok_or(Error::Protocol("find reply had no cursor field"))?;
        let cursor_view = match ValueRef::from_element(&cursor_el).map_err(Error::Bson)? {
            ValueRef::Document(v) => v,
            _ => return Err(Error::Protocol("cursor field was not a document")),
        };
        let cursor_id = match cursor_view.get("id").map_err(Error::Bson)? {
            Some(el) => match ValueRef::from_element(&el).map_err(Error::Bson)? {
                ValueRef::Int64(i) => i,
                ValueRef::Int32(i) => i64::from(i),
                _ => 0,
            },
            None => 0,
        };
        let batch = first_batch_cursor(reply)?.into();
        Ok(Self { client, db_name, collection, cursor_id, batch })
    }

    /// Returns the next document, issuing `getMore` when the current batch
    /// is exhausted but the server still holds cursor state (`cursor_id !=
    /// 0`). Returns `Ok(None)` once both the batch and the cursor are done.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        if let Some(doc) = self.batch.pop_front() {
            return Ok(Some(doc));
        }
        if self.cursor_id == 0 {
            return Ok(None);
        }
        let mut cmd = Document::empty();
        let mut m = cmd.mutator();
        m.append("getMore", &Value::Int64(self.cursor_id)).unwrap();
        m.append("collection", &Value::Utf8(self.collection.clone())).unwrap();
        drop(m);
        let reply = self.client.run_command(&self.db_name, cmd).await?;

        let view = reply.view();
        let cursor_el = view.get("cursor").map_err(Error::Bson)?.ok_or(Error::Protocol("getMore reply had no cursor field"))?;
        let cursor_view = match ValueRef::from_element(&cursor_el).map_err(Error::Bson)? {
            ValueRef::Document(v) => v,
            _ => return Err(Error::Protocol("cursor field was not a document")),
        };
        self.cursor_id = match cursor_view.get("id").map_err(Error::Bson)? {
            Some(el) => match ValueRef::from_element(&el).map_err(Error::Bson)? {
                ValueRef::Int64(i) => i,
                ValueRef::Int32(i) => i64::from(i),
                _ => 0,
            },
            None => 0,
        };
        let batch_el = cursor_view.get("nextBatch").map_err(Error::Bson)?.ok_or(Error::Protocol("getMore reply had no nextBatch"))?;
        let next_batch: Vec<Document> = match ValueRef::from_element(&batch_el).map_err(Error::Bson)? {
            ValueRef::Array(arr) => arr
                .iter()
                .map(|el| {
                    let el = el.map_err(Error::Bson)?;
                    match ValueRef::from_element(&el).map_err(Error::Bson)? {
                        ValueRef::Document(d) => Document::from_bytes(d.as_bytes()).map_err(Error::Bson),
                        _ => Err(Error::Protocol("nextBatch element was not a document")),
                    }
                })
                .collect::<Result<Vec<_>>>()?,
            _ => return Err(Error::Protocol("cursor.nextBatch was not an array")),
        };
        self.batch = next_batch.into();
        Ok(self.batch.pop_front())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn with_db_appends_dollar_db_field() {
        let cmd = Document::empty();
        let tagged = with_db(cmd, "test");
        let view = tagged.view();
        let el = view.get("$db").unwrap().unwrap();
        assert_eq!(ValueRef::from_element(&el).unwrap(), ValueRef::Utf8("test"));
    }

    #[test]
    fn check_ok_accepts_double_one() {
        let mut d = Document::empty();
        d.mutator().append("ok", &Value::Double(1.0)).unwrap();
        assert!(check_ok(&d).is_ok());
    }

    #[test]
    fn check_ok_rejects_zero_with_server_error() {
        let mut d = Document::empty();
        let mut m = d.mutator();
        m.append("ok", &Value::Double(0.0)).unwrap();
        m.append("code", &Value::Int32(13)).unwrap();
        m.append("errmsg", &Value::Utf8("not authorized".into())).unwrap();
        drop(m);
        match check_ok(&d) {
            Err(Error::Server { code, message }) => {
                assert_eq!(code, 13);
                assert_eq!(message, "not authorized");
            }
            other => panic!("expected Server error, got {other:?}"),
        }
    }
}
