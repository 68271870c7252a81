use crate::app::tests::{fast_backoff, test_app};
use crate::firestore::FirestoreError;
use crate::firestore::models::FieldOperator;
use crate::firestore::query::Query;
use crate::firestore::snapshot::ChangeKind;
use httpmock::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

const DOCS: &str = "/v1/projects/test-project/databases/(default)/documents";

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct User {
    username: String,
    age: i32,
    #[serde(rename = "deviceTokens", default)]
    device_tokens: Vec<String>,
}

fn alice_doc() -> serde_json::Value {
    json!({
        "name": "projects/test-project/databases/(default)/documents/users/alice",
        "fields": {
            "username": { "stringValue": "alice" },
            "age": { "integerValue": "30" },
            "deviceTokens": { "arrayValue": { "values": [ { "stringValue": "tok-1" } ] } },
            "address": { "mapValue": { "fields": { "city": { "stringValue": "Seoul" } } } }
        },
        "createTime": "2021-01-01T00:00:00Z",
        "updateTime": "2021-01-01T00:00:00Z"
    })
}

#[tokio::test]
async fn test_get_document() {
    let server = MockServer::start();
    let db = test_app(&server.base_url()).firestore();

    let mock = server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/users/alice", DOCS))
            .query_param("key", "test-api-key");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(alice_doc());
    });

    let user: Option<User> = db.collection("users").doc("alice").get().await.unwrap();
    assert_eq!(
        user,
        Some(User {
            username: "alice".to_string(),
            age: 30,
            device_tokens: vec!["tok-1".to_string()],
        })
    );

    let snapshot = db.doc("users/alice").snapshot().await.unwrap();
    assert!(snapshot.exists());
    assert_eq!(snapshot.id(), "alice");
    assert_eq!(snapshot.reference().path(), "users/alice");
    assert_eq!(snapshot.get_field::<String>("address.city").unwrap().as_deref(), Some("Seoul"));
    assert_eq!(snapshot.get_field::<String>("address.zip").unwrap(), None);

    mock.assert_calls(2);
}

#[tokio::test]
async fn test_get_missing_document() {
    let server = MockServer::start();
    let db = test_app(&server.base_url()).firestore();

    server.mock(|when, then| {
        when.method(GET).path(format!("{}/users/ghost", DOCS));
        then.status(404)
            .header("content-type", "application/json")
            .json_body(json!({ "error": { "code": 404, "message": "not found", "status": "NOT_FOUND" } }));
    });

    let user: Option<User> = db.doc("users/ghost").get().await.unwrap();
    assert!(user.is_none());
}

#[tokio::test]
async fn test_update_with_mask() {
    let server = MockServer::start();
    let db = test_app(&server.base_url()).firestore();

    let mock = server.mock(|when, then| {
        when.method(PATCH)
            .path(format!("{}/users/alice", DOCS))
            .query_param("updateMask.fieldPaths", "age")
            .query_param("currentDocument.exists", "true")
            .json_body(json!({ "fields": { "age": { "integerValue": "31" } } }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(alice_doc());
    });

    db.doc("users/alice")
        .update(&json!({ "age": 31 }), Some(&["age"]))
        .await
        .unwrap();

    mock.assert();
}

#[tokio::test]
async fn test_update_missing_document_fails() {
    let server = MockServer::start();
    let db = test_app(&server.base_url()).firestore();

    let mock = server.mock(|when, then| {
        when.method(PATCH)
            .path(format!("{}/users/ghost", DOCS))
            .query_param("currentDocument.exists", "true");
        then.status(404)
            .header("content-type", "application/json")
            .json_body(json!({ "error": { "code": 404, "message": "No document to update", "status": "NOT_FOUND" } }));
    });

    let err = db.doc("users/ghost").update(&json!({ "age": 1 }), None).await.unwrap_err();
    match err {
        FirestoreError::ApiError(msg) => assert!(msg.contains("NOT_FOUND")),
        other => panic!("unexpected error: {:?}", other),
    }
    mock.assert();
}

#[tokio::test]
async fn test_set_creates_without_precondition() {
    let server = MockServer::start();
    let db = test_app(&server.base_url()).firestore();

    let guarded = server.mock(|when, then| {
        when.method(PATCH)
            .path(format!("{}/users/alice", DOCS))
            .query_param_exists("currentDocument.exists");
        then.status(500);
    });
    let mock = server.mock(|when, then| {
        when.method(PATCH).path(format!("{}/users/alice", DOCS));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(alice_doc());
    });

    db.doc("users/alice").set(&json!({ "username": "alice" })).await.unwrap();

    mock.assert();
    guarded.assert_calls(0);
}

#[tokio::test]
async fn test_set_rejects_non_objects() {
    let server = MockServer::start();
    let db = test_app(&server.base_url()).firestore();

    let err = db.doc("users/alice").set(&42).await.unwrap_err();
    assert!(matches!(err, crate::firestore::FirestoreError::SerializationError(_)));
}

#[tokio::test]
async fn test_add_document() {
    let server = MockServer::start();
    let db = test_app(&server.base_url()).firestore();

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/follows", DOCS))
            .json_body(json!({
                "fields": {
                    "followerId": { "stringValue": "bob" },
                    "followingId": { "stringValue": "alice" }
                }
            }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "name": "projects/test-project/databases/(default)/documents/follows/f1",
                "fields": {},
                "createTime": "2021-01-01T00:00:00Z",
                "updateTime": "2021-01-01T00:00:00Z"
            }));
    });

    let reference = db
        .collection("follows")
        .add(&json!({ "followerId": "bob", "followingId": "alice" }))
        .await
        .unwrap();
    assert_eq!(reference.id(), "f1");
    assert_eq!(reference.path(), "follows/f1");

    mock.assert();
}

#[tokio::test]
async fn test_run_query() {
    let server = MockServer::start();
    let db = test_app(&server.base_url()).firestore();

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}:runQuery", DOCS))
            .json_body(json!({
                "structuredQuery": {
                    "from": [ { "collectionId": "users" } ],
                    "where": {
                        "fieldFilter": {
                            "field": { "fieldPath": "username" },
                            "op": "EQUAL",
                            "value": { "stringValue": "alice" }
                        }
                    },
                    "limit": 1
                }
            }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!([
                { "document": alice_doc(), "readTime": "2021-01-01T00:00:05Z" }
            ]));
    });

    let snapshot = db
        .collection("users")
        .query()
        .where_filter("username", FieldOperator::Equal, "alice")
        .unwrap()
        .limit(1)
        .get()
        .await
        .unwrap();

    assert_eq!(snapshot.size(), 1);
    assert_eq!(snapshot.read_time(), Some("2021-01-01T00:00:05Z"));
    let first = &snapshot.documents()[0];
    assert_eq!(first.id(), "alice");
    let user: User = first.data().unwrap().unwrap();
    assert_eq!(user.username, "alice");

    mock.assert();
}

#[test]
fn test_where_filters_compose_with_and() {
    let query = Query::new("users")
        .where_filter("age", FieldOperator::GreaterThan, 18)
        .unwrap()
        .where_filter("username", FieldOperator::NotEqual, "root")
        .unwrap()
        .where_filter("disabled", FieldOperator::Equal, false)
        .unwrap();

    let json = serde_json::to_value(&query.query).unwrap();
    let filters = &json["where"]["compositeFilter"];
    assert_eq!(filters["op"], "AND");
    assert_eq!(filters["filters"].as_array().unwrap().len(), 3);
    assert_eq!(filters["filters"][2]["fieldFilter"]["value"], json!({ "booleanValue": false }));
}

#[tokio::test]
async fn test_collection_listen() {
    let server = MockServer::start();
    let db = test_app(&server.base_url()).firestore().with_reconnect_policy(fast_backoff());

    let body = r#"[{"targetChange":{"targetChangeType":"ADD","targetIds":[1]}}
,{"documentChange":{"document":{"name":"projects/test-project/databases/(default)/documents/posts/p1","fields":{"content":{"stringValue":"hi @bob"},"userId":{"stringValue":"alice"}},"createTime":"2021-01-01T00:00:00Z","updateTime":"2021-01-01T00:00:00Z"},"targetIds":[1]}}
,{"targetChange":{"targetChangeType":"CURRENT","targetIds":[1]}}
,{"targetChange":{"readTime":"2021-01-01T00:00:01Z"}}
,{"documentChange":{"document":{"name":"projects/test-project/databases/(default)/documents/posts/p2","fields":{"content":{"stringValue":"second"},"userId":{"stringValue":"bob"}},"createTime":"2021-01-01T00:00:02Z","updateTime":"2021-01-01T00:00:02Z"},"targetIds":[1]}}
,{"targetChange":{"readTime":"2021-01-01T00:00:03Z"}}
]"#;

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}:listen", DOCS))
            .json_body(json!({
                "database": "projects/test-project/databases/(default)",
                "addTarget": {
                    "query": {
                        "parent": "projects/test-project/databases/(default)/documents",
                        "structuredQuery": { "from": [ { "collectionId": "posts" } ] }
                    },
                    "targetId": 1
                }
            }));
        then.status(200)
            .header("content-type", "application/json")
            .body(body);
    });

    let mut watch = db.collection("posts").listen().await.unwrap();

    let initial = watch.next_snapshot().await.unwrap().unwrap();
    assert_eq!(initial.size, 1);
    assert_eq!(initial.changes[0].id(), "p1");

    let next = watch.next_snapshot().await.unwrap().unwrap();
    let added: Vec<&str> = next.changes_of(ChangeKind::Added).map(|c| c.id()).collect();
    assert_eq!(added, vec!["p2"]);
    assert_eq!(next.size, 2);

    // The server keeps closing the stream without a resume token; the resent
    // documents are unchanged, so nothing more is emitted before giving up.
    assert!(watch.next_snapshot().await.is_none());

    mock.assert_calls(4);
}

#[tokio::test]
async fn test_listen_resumes_after_stream_closes() {
    let server = MockServer::start();
    let db = test_app(&server.base_url()).firestore().with_reconnect_policy(fast_backoff());

    let first = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}:listen", DOCS))
            .json_body(json!({
                "database": "projects/test-project/databases/(default)",
                "addTarget": {
                    "query": {
                        "parent": "projects/test-project/databases/(default)/documents",
                        "structuredQuery": { "from": [ { "collectionId": "posts" } ] }
                    },
                    "targetId": 1
                }
            }));
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"[{"targetChange":{"targetChangeType":"ADD","targetIds":[1]}}
,{"targetChange":{"targetChangeType":"CURRENT","targetIds":[1]}}
,{"targetChange":{"readTime":"2021-01-01T00:00:01Z","resumeToken":"tok-1"}}
]"#);
    });
    let resumed = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}:listen", DOCS))
            .body_includes(r#""resumeToken":"tok-1""#);
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"[{"targetChange":{"targetChangeType":"ADD","targetIds":[1]}}
,{"documentChange":{"document":{"name":"projects/test-project/databases/(default)/documents/posts/p1","fields":{"content":{"stringValue":"later"},"userId":{"stringValue":"alice"}},"createTime":"2021-01-01T00:00:02Z","updateTime":"2021-01-01T00:00:02Z"},"targetIds":[1]}}
,{"targetChange":{"targetChangeType":"CURRENT","targetIds":[1]}}
,{"targetChange":{"readTime":"2021-01-01T00:00:03Z","resumeToken":"tok-2"}}
]"#);
    });
    let rejected = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}:listen", DOCS))
            .body_includes(r#""resumeToken":"tok-2""#);
        then.status(403)
            .header("content-type", "application/json")
            .json_body(json!({ "error": { "code": 403, "message": "Permission denied", "status": "PERMISSION_DENIED" } }));
    });

    let mut watch = db.collection("posts").listen().await.unwrap();

    let initial = watch.next_snapshot().await.unwrap().unwrap();
    assert!(initial.changes.is_empty());
    assert_eq!(watch.resume_token(), Some("tok-1"));

    let next = watch.next_snapshot().await.unwrap().unwrap();
    let added: Vec<&str> = next.changes_of(ChangeKind::Added).map(|c| c.id()).collect();
    assert_eq!(added, vec!["p1"]);
    assert_eq!(watch.resume_token(), Some("tok-2"));

    // A rejected reconnect is final.
    match watch.next_snapshot().await {
        Some(Err(FirestoreError::ApiError(msg))) => assert!(msg.contains("PERMISSION_DENIED")),
        other => panic!("unexpected result: {:?}", other.map(|r| r.map(|s| s.size))),
    }

    first.assert();
    resumed.assert();
    rejected.assert();
}

#[tokio::test]
async fn test_listen_rejected() {
    let server = MockServer::start();
    let db = test_app(&server.base_url()).firestore();

    server.mock(|when, then| {
        when.method(POST).path(format!("{}:listen", DOCS));
        then.status(403)
            .header("content-type", "application/json")
            .json_body(json!({ "error": { "code": 403, "message": "Permission denied", "status": "PERMISSION_DENIED" } }));
    });

    let err = db.collection("posts").listen().await.err().unwrap();
    match err {
        FirestoreError::ApiError(msg) => assert!(msg.contains("PERMISSION_DENIED")),
        other => panic!("unexpected error: {:?}", other),
    }
}
