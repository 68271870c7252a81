use super::listen::Watch;
use super::models::{ArrayValue, Document, ListDocumentsResponse, MapValue, Value};
use super::query::{ExecutableQuery, Query};
use super::snapshot::DocumentSnapshot;
use super::{DatabaseRef, FirestoreError};
use crate::core::parse_error_response;
use reqwest::header;
use serde::de::{DeserializeOwned, Error};
use serde::ser::Error as SerError;
use serde::Serialize;
use serde_json::map::Map;
use serde_json::Value as SerdeValue;
use std::collections::HashMap;

// Helper to convert Firestore's value map to a standard serde_json::Value
pub(crate) fn convert_fields_to_serde_value(
    fields: HashMap<String, Value>,
) -> Result<SerdeValue, FirestoreError> {
    let mut map = Map::new();
    for (key, value) in fields {
        map.insert(key, convert_value_to_serde_value(value)?);
    }
    Ok(SerdeValue::Object(map))
}

pub(crate) fn convert_value_to_serde_value(value: Value) -> Result<SerdeValue, FirestoreError> {
    use serde_json::json;
    Ok(match value {
        Value::StringValue(s) => SerdeValue::String(s),
        Value::IntegerValue(s) => {
            let i: i64 = s.parse().map_err(|e| {
                <serde_json::Error as Error>::custom(format!(
                    "Failed to parse integer string '{}': {}",
                    s, e
                ))
            })?;
            SerdeValue::Number(i.into())
        }
        Value::DoubleValue(d) => SerdeValue::Number(serde_json::Number::from_f64(d).ok_or_else(
            || <serde_json::Error as Error>::custom(format!("Invalid f64 value: {}", d)),
        )?),
        Value::BooleanValue(b) => SerdeValue::Bool(b),
        Value::MapValue(map_value) => convert_fields_to_serde_value(map_value.fields)?,
        Value::ArrayValue(array_value) => SerdeValue::Array(
            array_value
                .values
                .into_iter()
                .map(convert_value_to_serde_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::NullValue(_) => SerdeValue::Null,
        Value::TimestampValue(s) => SerdeValue::String(s),
        Value::GeoPointValue(gp) => json!({ "latitude": gp.latitude, "longitude": gp.longitude }),
        Value::BytesValue(s) => SerdeValue::String(s),
        Value::ReferenceValue(s) => SerdeValue::String(s),
    })
}

// Helper to convert a serializable Rust struct to Firestore's value map
pub(crate) fn convert_serializable_to_fields<T: Serialize>(
    value: &T,
) -> Result<HashMap<String, Value>, FirestoreError> {
    match serde_json::to_value(value)? {
        SerdeValue::Object(map) => map
            .into_iter()
            .map(|(k, v)| Ok((k, convert_serde_value_to_firestore_value(v)?)))
            .collect::<Result<HashMap<_, _>, FirestoreError>>(),
        _ => Err(FirestoreError::SerializationError(SerError::custom(
            "Can only set objects as documents",
        ))),
    }
}

pub(crate) fn convert_serde_value_to_firestore_value(value: SerdeValue) -> Result<Value, FirestoreError> {
    Ok(match value {
        SerdeValue::Null => Value::NullValue(()),
        SerdeValue::Bool(b) => Value::BooleanValue(b),
        SerdeValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::IntegerValue(i.to_string())
            } else if let Some(f) = n.as_f64() {
                Value::DoubleValue(f)
            } else {
                return Err(FirestoreError::SerializationError(SerError::custom(format!(
                    "Unsupported number type: {}",
                    n
                ))));
            }
        }
        SerdeValue::String(s) => Value::StringValue(s),
        SerdeValue::Array(a) => Value::ArrayValue(ArrayValue {
            values: a
                .into_iter()
                .map(convert_serde_value_to_firestore_value)
                .collect::<Result<Vec<_>, _>>()?,
        }),
        SerdeValue::Object(o) => Value::MapValue(MapValue {
            fields: o
                .into_iter()
                .map(|(k, v)| Ok((k, convert_serde_value_to_firestore_value(v)?)))
                .collect::<Result<HashMap<_, _>, FirestoreError>>()?,
        }),
    })
}

/// A reference to a single document, e.g. `users/alice`.
#[derive(Clone, Debug)]
pub struct DocumentReference<'a> {
    pub(crate) db: DatabaseRef<'a>,
    /// Full resource name: `projects/{p}/databases/{d}/documents/{path}`.
    pub(crate) name: String,
}

impl<'a> DocumentReference<'a> {
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    /// The slash-separated path relative to the database root.
    pub fn path(&self) -> &str {
        self.db.relative_path(&self.name)
    }

    pub fn collection(&self, collection_id: &str) -> CollectionReference<'a> {
        CollectionReference {
            db: self.db,
            name: format!("{}/{}", self.name, collection_id),
        }
    }

    /// Reads the document and deserializes its fields. `Ok(None)` when it doesn't exist.
    pub async fn get<T: DeserializeOwned>(&self) -> Result<Option<T>, FirestoreError> {
        self.snapshot().await?.data()
    }

    /// Reads the document into a snapshot.
    pub async fn snapshot(&self) -> Result<DocumentSnapshot<'a>, FirestoreError> {
        let response = self.db.client.get(self.db.url(&self.name)).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(DocumentSnapshot {
                reference: self.clone(),
                document: None,
                read_time: None,
            });
        }

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, "Get document failed").await,
            ));
        }

        let doc: Document = response.json().await?;
        Ok(DocumentSnapshot {
            reference: self.clone(),
            document: Some(doc),
            read_time: None,
        })
    }

    /// Creates or overwrites the document.
    pub async fn set<T: Serialize>(&self, value: &T) -> Result<(), FirestoreError> {
        self.patch(value, None, false).await
    }

    /// Updates an existing document. With a mask, only the listed fields are
    /// written. Fails with the server's `NOT_FOUND` if the document is missing.
    pub async fn update<T: Serialize>(
        &self,
        value: &T,
        update_mask: Option<&[&str]>,
    ) -> Result<(), FirestoreError> {
        self.patch(value, update_mask, true).await
    }

    async fn patch<T: Serialize>(
        &self,
        value: &T,
        update_mask: Option<&[&str]>,
        must_exist: bool,
    ) -> Result<(), FirestoreError> {
        let fields = convert_serializable_to_fields(value)?;
        let body = serde_json::to_vec(&serde_json::json!({ "fields": fields }))?;

        let mut url = url::Url::parse(&self.db.url(&self.name))?;
        {
            let mut pairs = url.query_pairs_mut();
            for field in update_mask.unwrap_or_default() {
                pairs.append_pair("updateMask.fieldPaths", field);
            }
            if must_exist {
                pairs.append_pair("currentDocument.exists", "true");
            }
        }

        let response = self
            .db
            .client
            .patch(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, "Write document failed").await,
            ));
        }

        Ok(())
    }

    pub async fn delete(&self) -> Result<(), FirestoreError> {
        let response = self.db.client.delete(self.db.url(&self.name)).send().await?;

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, "Delete document failed").await,
            ));
        }

        Ok(())
    }
}

/// A reference to a collection, e.g. `users` or `users/alice/devices`.
#[derive(Clone, Debug)]
pub struct CollectionReference<'a> {
    pub(crate) db: DatabaseRef<'a>,
    /// Full resource name of the collection.
    pub(crate) name: String,
}

impl<'a> CollectionReference<'a> {
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    pub fn doc(&self, document_id: &str) -> DocumentReference<'a> {
        DocumentReference {
            db: self.db,
            name: format!("{}/{}", self.name, document_id),
        }
    }

    /// Starts a query over this collection.
    pub fn query(&self) -> ExecutableQuery<'a> {
        let parent = self
            .name
            .rsplit_once('/')
            .map(|(parent, _)| parent.to_string())
            .unwrap_or_default();
        ExecutableQuery::new(self.db, parent, Query::new(self.id()))
    }

    /// Watches every document in the collection.
    pub async fn listen(&self) -> Result<Watch, FirestoreError> {
        self.query().listen().await
    }

    pub async fn list_documents(&self) -> Result<ListDocumentsResponse, FirestoreError> {
        let response = self.db.client.get(self.db.url(&self.name)).send().await?;

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, "List documents failed").await,
            ));
        }

        Ok(response.json().await?)
    }

    /// Adds a document with a server-generated id.
    pub async fn add<T: Serialize>(&self, value: &T) -> Result<DocumentReference<'a>, FirestoreError> {
        let fields = convert_serializable_to_fields(value)?;
        let body = serde_json::to_vec(&serde_json::json!({ "fields": fields }))?;

        let response = self
            .db
            .client
            .post(self.db.url(&self.name))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, "Add document failed").await,
            ));
        }

        let doc: Document = response.json().await?;
        Ok(DocumentReference {
            db: self.db,
            name: doc.name,
        })
    }
}
