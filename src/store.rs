//! Read-only access to the `products` and `orders` collections
//!
//! The extraction step only needs two record streams, so the store sits behind
//! the [`DocumentStore`] trait. [`MongoStore`] talks to a live MongoDB
//! deployment; [`SnapshotStore`] reads a `mongoexport` dump from disk and
//! [`MemoryStore`] holds records built in code.

use crate::error::SegmentError;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::FindOptions;
use mongodb::sync::{Client, Database};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Local development connection string used when none is configured
pub const DEFAULT_MONGO_URI: &str = "mongodb://localhost:27017/chocair";

const PRODUCTS_COLLECTION: &str = "products";
const ORDERS_COLLECTION: &str = "orders";

/// A product and its (optional) category
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub id: String,
    pub category: Option<String>,
}

/// One line of an order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LineItem {
    /// Referenced product id, if the line carries one
    pub product: Option<String>,
    /// Purchased quantity, 0 when absent
    pub qty: u64,
}

/// An order as seen by the extraction step
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderRecord {
    /// Contact phone used as the stable user key
    pub customer_phone: Option<String>,
    pub items: Vec<LineItem>,
}

/// Lazily evaluated stream of orders
pub type OrderStream<'a> = Box<dyn Iterator<Item = crate::Result<OrderRecord>> + 'a>;

/// Source of the two record collections the extraction step reads
pub trait DocumentStore {
    /// Load every product with its category
    fn products(&self) -> crate::Result<Vec<ProductRecord>>;

    /// Stream every order; an `Err` item aborts the consumer
    fn orders(&self) -> crate::Result<OrderStream<'_>>;
}

/// MongoDB-backed store using the driver's synchronous API
///
/// The connection is held for the lifetime of the value and released when
/// it is dropped at the end of the step.
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// Connect using a connection string that names the database
    pub fn connect(uri: &str) -> crate::Result<Self> {
        let client = Client::with_uri_str(uri).map_err(SegmentError::from)?;
        let database = client.default_database().ok_or_else(|| {
            SegmentError::Connectivity("connection string does not name a database".to_string())
        })?;
        debug!("Connected to database {}", database.name());
        Ok(Self { database })
    }
}

impl DocumentStore for MongoStore {
    fn products(&self) -> crate::Result<Vec<ProductRecord>> {
        let options = FindOptions::builder()
            .projection(doc! { "_id": 1, "category": 1 })
            .build();
        let cursor = self
            .database
            .collection::<Document>(PRODUCTS_COLLECTION)
            .find(None, options)
            .map_err(SegmentError::from)?;

        let mut products = Vec::new();
        for doc in cursor {
            let doc = doc.map_err(SegmentError::from)?;
            if let Some(product) = product_from_document(&doc) {
                products.push(product);
            }
        }
        Ok(products)
    }

    fn orders(&self) -> crate::Result<OrderStream<'_>> {
        let cursor = self
            .database
            .collection::<Document>(ORDERS_COLLECTION)
            .find(None, None)
            .map_err(SegmentError::from)?;

        Ok(Box::new(cursor.map(|doc| match doc {
            Ok(doc) => Ok(order_from_document(&doc)),
            Err(e) => Err(SegmentError::from(e).into()),
        })))
    }
}

/// Store backed by a directory of `mongoexport` files
///
/// Expects `products.json` and `orders.json`; each may be a JSON array or a
/// sequence of newline-delimited documents, in relaxed or canonical
/// extended JSON.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub const PRODUCTS_FILE: &'static str = "products.json";
    pub const ORDERS_FILE: &'static str = "orders.json";

    pub fn open(dir: impl Into<PathBuf>) -> crate::Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(snapshot_error(&dir, "not a directory").into());
        }
        Ok(Self { dir })
    }
}

impl DocumentStore for SnapshotStore {
    fn products(&self) -> crate::Result<Vec<ProductRecord>> {
        let mut products = Vec::new();
        for doc in read_documents(&self.dir.join(Self::PRODUCTS_FILE))? {
            if let Some(product) = product_from_document(&doc?) {
                products.push(product);
            }
        }
        Ok(products)
    }

    fn orders(&self) -> crate::Result<OrderStream<'_>> {
        let docs = read_documents(&self.dir.join(Self::ORDERS_FILE))?;
        Ok(Box::new(
            docs.map(|doc| doc.map(|doc| order_from_document(&doc))),
        ))
    }
}

/// In-process store, mostly useful for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub products: Vec<ProductRecord>,
    pub orders: Vec<OrderRecord>,
}

impl DocumentStore for MemoryStore {
    fn products(&self) -> crate::Result<Vec<ProductRecord>> {
        Ok(self.products.clone())
    }

    fn orders(&self) -> crate::Result<OrderStream<'_>> {
        Ok(Box::new(self.orders.iter().cloned().map(Ok)))
    }
}

/// Map a `products` document; documents without an `_id` are dropped
pub fn product_from_document(doc: &Document) -> Option<ProductRecord> {
    let id = doc.get("_id").and_then(bson_to_key)?;
    let category = doc.get_str("category").ok().map(str::to_owned);
    Some(ProductRecord { id, category })
}

/// Map an `orders` document
pub fn order_from_document(doc: &Document) -> OrderRecord {
    let customer_phone = doc
        .get_document("customerInfo")
        .ok()
        .and_then(|info| info.get("phone"))
        .and_then(bson_to_key)
        .filter(|phone| !phone.is_empty());

    let items = doc
        .get_array("orderItems")
        .map(|items| {
            items
                .iter()
                .filter_map(Bson::as_document)
                .map(line_item_from_document)
                .collect()
        })
        .unwrap_or_default();

    OrderRecord {
        customer_phone,
        items,
    }
}

fn line_item_from_document(item: &Document) -> LineItem {
    LineItem {
        product: item.get("product").and_then(bson_to_key),
        qty: item.get("qty").map(quantity_from_bson).unwrap_or(0),
    }
}

/// String form of an id-like value; ObjectIds use their hex representation
fn bson_to_key(value: &Bson) -> Option<String> {
    match value {
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::String(s) => Some(s.clone()),
        Bson::Int32(v) => Some(v.to_string()),
        Bson::Int64(v) => Some(v.to_string()),
        Bson::Null | Bson::Undefined => None,
        other => Some(other.to_string()),
    }
}

fn quantity_from_bson(value: &Bson) -> u64 {
    match value {
        Bson::Int32(v) => (*v).max(0) as u64,
        Bson::Int64(v) => (*v).max(0) as u64,
        Bson::Double(v) if v.is_finite() && *v > 0.0 => v.trunc() as u64,
        _ => 0,
    }
}

type DocumentIter = Box<dyn Iterator<Item = crate::Result<Document>>>;

fn read_documents(path: &Path) -> crate::Result<DocumentIter> {
    let file = File::open(path).map_err(|e| snapshot_error(path, e))?;
    let path = path.to_path_buf();

    let values = serde_json::Deserializer::from_reader(BufReader::new(file))
        .into_iter::<serde_json::Value>();
    let docs = values.flat_map(move |value| -> Vec<crate::Result<Document>> {
        match value {
            Ok(serde_json::Value::Array(items)) => items
                .into_iter()
                .map(|item| json_to_document(item, &path))
                .collect(),
            Ok(item) => vec![json_to_document(item, &path)],
            Err(e) => vec![Err(snapshot_error(&path, e).into())],
        }
    });
    Ok(Box::new(docs))
}

fn json_to_document(value: serde_json::Value, path: &Path) -> crate::Result<Document> {
    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(snapshot_error(
            path,
            format!("expected a document, found {:?}", other.element_type()),
        )
        .into()),
        Err(e) => Err(snapshot_error(path, e).into()),
    }
}

fn snapshot_error(path: &Path, reason: impl ToString) -> SegmentError {
    SegmentError::Snapshot {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
