use super::models::Document;
use super::reference::{convert_fields_to_serde_value, convert_value_to_serde_value, DocumentReference};
use super::FirestoreError;
use serde::de::DeserializeOwned;

/// Deserializes the fields of a document into `T`.
pub(crate) fn document_data<T: DeserializeOwned>(doc: &Document) -> Result<T, FirestoreError> {
    let serde_value = convert_fields_to_serde_value(doc.fields.clone())?;
    Ok(serde_json::from_value(serde_value)?)
}

/// A snapshot of a document in Firestore.
///
/// It contains data read from a document in your Firestore database.
/// The data can be extracted with `.data()`.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot<'a> {
    pub(crate) reference: DocumentReference<'a>,
    pub(crate) document: Option<Document>,
    pub(crate) read_time: Option<String>,
}

impl<'a> DocumentSnapshot<'a> {
    /// The ID of the document.
    pub fn id(&self) -> &str {
        self.reference.id()
    }

    /// The `DocumentReference` for the document.
    pub fn reference(&self) -> &DocumentReference<'a> {
        &self.reference
    }

    /// Returns `true` if the document exists.
    pub fn exists(&self) -> bool {
        self.document.is_some()
    }

    /// The time the document was created. Returns `None` if the document does not exist.
    pub fn create_time(&self) -> Option<&str> {
        self.document.as_ref().map(|d| d.create_time.as_str())
    }

    /// The time the document was last updated. Returns `None` if the document does not exist.
    pub fn update_time(&self) -> Option<&str> {
        self.document.as_ref().map(|d| d.update_time.as_str())
    }

    /// The time this snapshot was read, when the server reported one.
    pub fn read_time(&self) -> Option<&str> {
        self.read_time.as_deref()
    }

    /// Retrieves all fields in the document as a specific type.
    ///
    /// Returns `Ok(None)` if the document does not exist.
    pub fn data<T: DeserializeOwned>(&self) -> Result<Option<T>, FirestoreError> {
        self.document.as_ref().map(document_data::<T>).transpose()
    }

    /// Retrieves a specific field from the document.
    ///
    /// # Arguments
    ///
    /// * `path` - Dot-separated path to the field (e.g., "address.city").
    pub fn get_field<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, FirestoreError> {
        let Some(doc) = &self.document else {
            return Ok(None);
        };

        let mut segments = path.split('.');
        let mut current = segments.next().and_then(|first| doc.fields.get(first));
        for segment in segments {
            current = match current {
                Some(super::models::Value::MapValue(map)) => map.fields.get(segment),
                _ => None,
            };
        }

        match current {
            Some(value) => {
                let serde_value = convert_value_to_serde_value(value.clone())?;
                Ok(Some(serde_json::from_value(serde_value)?))
            }
            None => Ok(None),
        }
    }
}

/// A `QuerySnapshot` contains zero or more `DocumentSnapshot` objects.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<'a> {
    pub(crate) documents: Vec<DocumentSnapshot<'a>>,
    pub(crate) read_time: Option<String>,
}

impl<'a> QuerySnapshot<'a> {
    /// The documents in this snapshot.
    pub fn documents(&self) -> &[DocumentSnapshot<'a>] {
        &self.documents
    }

    /// Returns `true` if there are no documents in the snapshot.
    pub fn empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// The number of documents in the snapshot.
    pub fn size(&self) -> usize {
        self.documents.len()
    }

    /// The time this snapshot was read.
    pub fn read_time(&self) -> Option<&str> {
        self.read_time.as_deref()
    }

    /// Iterates over the document snapshots.
    pub fn iter(&self) -> std::slice::Iter<'_, DocumentSnapshot<'a>> {
        self.documents.iter()
    }
}

impl<'s, 'a> IntoIterator for &'s QuerySnapshot<'a> {
    type Item = &'s DocumentSnapshot<'a>;
    type IntoIter = std::slice::Iter<'s, DocumentSnapshot<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

/// How a document changed between two watch snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// A single document change inside a [`WatchSnapshot`].
#[derive(Debug, Clone)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    /// For removals this is the last version the watch saw.
    pub document: Document,
}

impl DocumentChange {
    pub fn id(&self) -> &str {
        self.document.id()
    }

    pub fn data<T: DeserializeOwned>(&self) -> Result<T, FirestoreError> {
        document_data(&self.document)
    }
}

/// A consistent view of a watched target, with the changes since the previous one.
#[derive(Debug, Clone, Default)]
pub struct WatchSnapshot {
    pub changes: Vec<DocumentChange>,
    pub read_time: Option<String>,
    /// Number of documents matching the target after applying the changes.
    pub size: usize,
}

impl WatchSnapshot {
    /// Changes of the given kind, in arrival order.
    pub fn changes_of(&self, kind: ChangeKind) -> impl Iterator<Item = &DocumentChange> {
        self.changes.iter().filter(move |c| c.kind == kind)
    }
}
