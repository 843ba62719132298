//! SQLite persistence for validated invoices.
//!
//! Two tables: one row per invoice, one row per line item pointing at its
//! invoice. Rows are only ever appended: running the same document twice
//! stores it twice, since invoice numbers are not trusted to be unique.
//!
//! All calls are blocking; async callers go through [`save_invoice`], which
//! opens the database on a blocking thread, writes one transaction and closes
//! the connection again.

use crate::error::InvoiceError;
use crate::model::Invoice;
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS invoices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        vendor_name TEXT,
        invoice_number TEXT,
        date TEXT,
        grand_total REAL
    );
    CREATE TABLE IF NOT EXISTS line_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        invoice_id INTEGER REFERENCES invoices(id),
        description TEXT,
        quantity NUMERIC,
        price REAL
    );";

/// One row of the `invoices` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceRecord {
    pub id: i64,
    pub vendor_name: Option<String>,
    pub invoice_number: Option<String>,
    pub date: Option<NaiveDate>,
    pub grand_total: Option<f64>,
}

/// One row of the `line_items` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItemRecord {
    pub id: i64,
    pub invoice_id: i64,
    pub description: Option<String>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
}

/// Snapshot of both tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDump {
    pub invoices: Vec<InvoiceRecord>,
    pub line_items: Vec<LineItemRecord>,
}

impl fmt::Display for TableDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Invoices Table:")?;
        for r in &self.invoices {
            writeln!(
                f,
                "({}, {}, {}, {}, {})",
                r.id,
                text(&r.vendor_name),
                text(&r.invoice_number),
                text(&r.date),
                number(&r.grand_total)
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Line Items Table:")?;
        for r in &self.line_items {
            writeln!(
                f,
                "({}, {}, {}, {}, {})",
                r.id,
                r.invoice_id,
                text(&r.description),
                number(&r.quantity),
                number(&r.price)
            )?;
        }
        Ok(())
    }
}

fn text<T: fmt::Display>(v: &Option<T>) -> String {
    v.as_ref()
        .map_or_else(|| "None".to_string(), |v| format!("'{v}'"))
}

fn number(v: &Option<f64>) -> String {
    v.map_or_else(|| "None".to_string(), |v| format!("{v:?}"))
}

/// An open invoice database.
pub struct InvoiceStore {
    conn: Connection,
    path: PathBuf,
}

impl InvoiceStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, InvoiceError> {
        let open_err = |source| InvoiceError::StoreOpen {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| InvoiceError::StoreDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path).map_err(open_err)?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.init().map_err(open_err)?;
        debug!("Opened invoice database {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, InvoiceError> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|source| InvoiceError::StoreOpen {
            path: path.clone(),
            source,
        })?;
        let store = Self { conn, path };
        store.init().map_err(|source| InvoiceError::StoreOpen {
            path: store.path.clone(),
            source,
        })?;
        Ok(store)
    }

    fn init(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        self.conn.execute_batch(SCHEMA)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a validated invoice and its line items in one transaction.
    ///
    /// Returns the generated invoice id. On any failure the transaction is
    /// rolled back and nothing is written.
    pub fn insert_invoice(&mut self, invoice: &Invoice) -> Result<i64, InvoiceError> {
        let write_err = |source| InvoiceError::StoreWrite {
            invoice_number: invoice.invoice_number.clone(),
            source,
        };

        let tx = self.conn.transaction().map_err(write_err)?;
        tx.execute(
            "INSERT INTO invoices (vendor_name, invoice_number, date, grand_total)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                invoice.vendor_name(),
                invoice.invoice_number,
                invoice.invoice_date,
                invoice.grand_total
            ],
        )
        .map_err(write_err)?;
        let invoice_id = tx.last_insert_rowid();

        for item in &invoice.line_items {
            tx.execute(
                "INSERT INTO line_items (invoice_id, description, quantity, price)
                 VALUES (?1, ?2, ?3, ?4)",
                params![invoice_id, item.description, item.quantity, item.price],
            )
            .map_err(write_err)?;
        }
        tx.commit().map_err(write_err)?;

        info!(
            "Saved invoice {} as id {} with {} line items",
            invoice.invoice_number,
            invoice_id,
            invoice.line_items.len()
        );
        Ok(invoice_id)
    }

    pub fn invoices(&self) -> Result<Vec<InvoiceRecord>, InvoiceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, vendor_name, invoice_number, date, grand_total FROM invoices ORDER BY id")
            .map_err(InvoiceError::StoreRead)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(InvoiceRecord {
                    id: row.get(0)?,
                    vendor_name: row.get(1)?,
                    invoice_number: row.get(2)?,
                    date: row.get(3)?,
                    grand_total: row.get(4)?,
                })
            })
            .map_err(InvoiceError::StoreRead)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(InvoiceError::StoreRead)
    }

    pub fn line_items(&self) -> Result<Vec<LineItemRecord>, InvoiceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, invoice_id, description, quantity, price FROM line_items ORDER BY id")
            .map_err(InvoiceError::StoreRead)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LineItemRecord {
                    id: row.get(0)?,
                    invoice_id: row.get(1)?,
                    description: row.get(2)?,
                    quantity: row.get(3)?,
                    price: row.get(4)?,
                })
            })
            .map_err(InvoiceError::StoreRead)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(InvoiceError::StoreRead)
    }

    /// Read both tables.
    pub fn dump(&self) -> Result<TableDump, InvoiceError> {
        Ok(TableDump {
            invoices: self.invoices()?,
            line_items: self.line_items()?,
        })
    }
}

/// Open the database, insert `invoice`, and close it again.
///
/// Runs on tokio's blocking pool so the SQLite I/O does not stall the runtime.
pub async fn save_invoice(path: &Path, invoice: &Invoice) -> Result<i64, InvoiceError> {
    let path = path.to_path_buf();
    let invoice = invoice.clone();
    tokio::task::spawn_blocking(move || {
        let mut store = InvoiceStore::open(&path)?;
        store.insert_invoice(&invoice)
    })
    .await
    .map_err(|e| InvoiceError::Internal(format!("Store task panicked: {}", e)))?
}

/// Open the database and read both tables.
pub async fn dump_tables(path: &Path) -> Result<TableDump, InvoiceError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || InvoiceStore::open(&path)?.dump())
        .await
        .map_err(|e| InvoiceError::Internal(format!("Store task panicked: {}", e)))?
}
