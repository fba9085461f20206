use docbase::data_types::{Attribute, AttributeType, Document};
use docbase::error::ErrorKind;
use docbase::query::Q;
use docbase::service::App;
use rstest::rstest;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{memory_app, postgres_app};

fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected a JSON object"),
    }
}

async fn todo_flow(app: App, project_name: &str) {
    let user = app.users.register().await.unwrap();
    let project = app.projects.create(user.id, project_name).await.unwrap();

    // The same name again is a conflict
    let err = app.projects.create(user.id, project_name).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    app.collections
        .create(
            project.id,
            "todos",
            vec![
                Attribute::new("title", AttributeType::String).required(),
                Attribute::new("priority", AttributeType::Integer).indexed(),
                Attribute::new("done", AttributeType::Boolean),
            ],
        )
        .await
        .unwrap();

    let milk = app
        .documents
        .create(
            project.id,
            "todos",
            document(json!({"title": "buy milk", "priority": 2})),
        )
        .await
        .unwrap();
    let bread = app
        .documents
        .create(
            project.id,
            "todos",
            document(json!({"title": "buy bread", "priority": 5, "done": true})),
        )
        .await
        .unwrap();
    assert_ne!(milk["id"], bread["id"]);

    // Missing required attribute
    let err = app
        .documents
        .create(project.id, "todos", document(json!({"priority": 1})))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);

    let found = app
        .documents
        .get(
            project.id,
            "todos",
            Q::new()
                .select(["title", "priority"])
                .starts_with("title", "buy")
                .greater_than("priority", 3),
        )
        .await
        .unwrap();
    assert_eq!(found, document(json!({"title": "buy bread", "priority": 5})));

    let found = app
        .documents
        .get(project.id, "todos", Q::new().null("done"))
        .await
        .unwrap();
    assert_eq!(found["id"], milk["id"]);

    let id: Uuid = milk["id"].as_str().unwrap().parse().unwrap();
    let updated = app
        .documents
        .update(project.id, "todos", id, document(json!({"done": true})))
        .await
        .unwrap();
    assert_eq!(updated["done"], json!(true));
    assert_eq!(updated["title"], json!("buy milk"));

    app.documents.delete(project.id, "todos", id).await.unwrap();
    let err = app
        .documents
        .get_by_id(project.id, "todos", id)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[rstest]
#[tokio::test]
async fn test_todo_flow_memory(#[future] memory_app: App) {
    todo_flow(memory_app.await, "Acme").await;
}

#[tokio::test]
async fn test_todo_flow_postgres() {
    let Some(app) = postgres_app().await else {
        return;
    };
    // Project names are global, so don't collide with earlier runs
    let name = format!("acme_{}", Uuid::new_v4().simple());
    todo_flow(app, &name).await;
}

#[rstest]
#[tokio::test]
async fn test_tenants_are_isolated(#[future] memory_app: App) {
    let app = memory_app.await;
    let user = app.users.register().await.unwrap();

    let mut projects = vec![];
    for name in ["Acme", "Globex"] {
        let project = app.projects.create(user.id, name).await.unwrap();
        app.collections
            .create(
                project.id,
                "todos",
                vec![Attribute::new("title", AttributeType::String)],
            )
            .await
            .unwrap();
        projects.push(project);
    }

    app.documents
        .create(projects[0].id, "todos", document(json!({"title": "acme only"})))
        .await
        .unwrap();

    let err = app
        .documents
        .get(projects[1].id, "todos", Q::new().equal("title", "acme only"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}
