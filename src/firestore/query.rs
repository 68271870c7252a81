use super::listen::{Watch, WATCH_TARGET_ID};
use super::models::{
    CollectionSelector, CompositeFilter, CompositeOperator, Direction, FieldFilter, FieldOperator,
    FieldReference, Filter, ListenRequest, Order, QueryTarget, RunQueryRequest, RunQueryResponse,
    StructuredQuery, Target, TargetType,
};
use super::reference::{convert_serde_value_to_firestore_value, DocumentReference};
use super::snapshot::{DocumentSnapshot, QuerySnapshot};
use super::{DatabaseRef, FirestoreError};
use crate::core::parse_error_response;
use reqwest::header;
use serde::Serialize;
use tracing::debug;

/// A definition of a Firestore query: the target collection plus filters,
/// ordering and limits.
///
/// It is independent of any client so it can be built once and reused.
#[derive(Clone, Debug)]
pub struct Query {
    pub(crate) query: StructuredQuery,
}

impl Query {
    /// Creates a new `Query` targeting the specified collection.
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            query: StructuredQuery {
                from: vec![CollectionSelector {
                    collection_id: collection_id.into(),
                    all_descendants: None,
                }],
                ..Default::default()
            },
        }
    }

    /// Adds a filter to the query. Filters are combined with AND.
    pub fn where_filter<T: Serialize>(
        mut self,
        field: &str,
        op: FieldOperator,
        value: T,
    ) -> Result<Self, FirestoreError> {
        let value = convert_serde_value_to_firestore_value(serde_json::to_value(value)?)?;

        let filter = Filter::FieldFilter(FieldFilter {
            field: FieldReference {
                field_path: field.to_string(),
            },
            op,
            value,
        });

        self.query.where_clause = Some(match self.query.where_clause.take() {
            None => filter,
            Some(Filter::CompositeFilter(mut cf)) if cf.op == CompositeOperator::And => {
                cf.filters.push(filter);
                Filter::CompositeFilter(cf)
            }
            Some(existing) => Filter::CompositeFilter(CompositeFilter {
                op: CompositeOperator::And,
                filters: vec![existing, filter],
            }),
        });

        Ok(self)
    }

    /// Sorts the query results by the specified field.
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.query.order_by.push(Order {
            field: FieldReference {
                field_path: field.to_string(),
            },
            direction,
        });
        self
    }

    /// Limits the number of documents returned.
    pub fn limit(mut self, limit: i32) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Skips the first N documents.
    pub fn offset(mut self, offset: i32) -> Self {
        self.query.offset = Some(offset);
        self
    }
}

/// A `Query` attached to a Firestore client, ready for execution.
#[derive(Clone, Debug)]
pub struct ExecutableQuery<'a> {
    pub(crate) db: DatabaseRef<'a>,
    /// Resource name of the parent document, or the database's documents root.
    pub(crate) parent: String,
    pub(crate) query: Query,
}

impl<'a> ExecutableQuery<'a> {
    pub(crate) fn new(db: DatabaseRef<'a>, parent: String, query: Query) -> Self {
        Self { db, parent, query }
    }

    /// Adds a filter to the query.
    pub fn where_filter<T: Serialize>(
        self,
        field: &str,
        op: FieldOperator,
        value: T,
    ) -> Result<Self, FirestoreError> {
        Ok(Self {
            query: self.query.where_filter(field, op, value)?,
            ..self
        })
    }

    /// Sorts the query results.
    pub fn order_by(self, field: &str, direction: Direction) -> Self {
        Self {
            query: self.query.order_by(field, direction),
            ..self
        }
    }

    /// Limits the results.
    pub fn limit(self, limit: i32) -> Self {
        Self {
            query: self.query.limit(limit),
            ..self
        }
    }

    /// Offsets the results.
    pub fn offset(self, offset: i32) -> Self {
        Self {
            query: self.query.offset(offset),
            ..self
        }
    }

    /// Executes the query and returns the results as a `QuerySnapshot`.
    pub async fn get(&self) -> Result<QuerySnapshot<'a>, FirestoreError> {
        let url = format!("{}:runQuery", self.db.url(&self.parent));

        let request = RunQueryRequest {
            structured_query: self.query.query.clone(),
        };

        let response = self
            .db
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FirestoreError::ApiError(
                parse_error_response(response, "Run query failed").await,
            ));
        }

        let responses: Vec<RunQueryResponse> = response.json().await?;

        let mut documents = Vec::new();
        let mut read_time = None;

        for res in responses {
            if let Some(rt) = res.read_time {
                read_time = Some(rt);
            }

            if let Some(doc) = res.document {
                documents.push(DocumentSnapshot {
                    reference: DocumentReference {
                        db: self.db,
                        name: doc.name.clone(),
                    },
                    document: Some(doc),
                    read_time: read_time.clone(),
                });
            }
        }

        debug!(parent = %self.parent, count = documents.len(), "query returned");

        Ok(QuerySnapshot {
            documents,
            read_time,
        })
    }

    /// Listens to changes to the query results.
    ///
    /// Fails if the first listen call is rejected; later interruptions are
    /// handled by the returned [`Watch`].
    pub async fn listen(&self) -> Result<Watch, FirestoreError> {
        let request = ListenRequest {
            database: self.db.database.to_string(),
            add_target: Target {
                target_type: TargetType::Query(QueryTarget {
                    parent: self.parent.clone(),
                    structured_query: self.query.query.clone(),
                }),
                target_id: WATCH_TARGET_ID,
                resume_token: None,
            },
        };

        Watch::open(self.db, request).await
    }
}
