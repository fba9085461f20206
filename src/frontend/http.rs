use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;
use warp::{hyper::StatusCode, Filter, Reply};

use crate::config::schema::HttpFrontend;
use crate::data_types::{Attribute, Document, UserId};
use crate::error::{Error, Result};
use crate::query::Q;
use crate::service::App;
use crate::version::BuildInfo;

use super::http_utils::{into_response, with_timeout, ApiError};

const MAX_BODY_LENGTH: u64 = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct NewProjectBody {
    user_id: UserId,
    name: String,
}

#[derive(Debug, Deserialize)]
struct NewCollectionBody {
    name: String,
    #[serde(default)]
    attributes: Vec<Attribute>,
}

fn created(value: &impl serde::Serialize) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(value), StatusCode::CREATED).into_response()
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_LENGTH).and(warp::body::json())
}

/// Translate query string pairs into a filter. `select=a,b` sets the
/// projection; any other key is a column, optionally suffixed with
/// `__<operator>` (`eq` when absent).
pub fn parse_filters(params: &[(String, String)]) -> Result<Q> {
    let mut q = Q::new();

    for (key, value) in params {
        if key == "select" {
            q = q.select(value.split(',').filter(|c| !c.is_empty()));
            continue;
        }

        let (column, op) = match key.rsplit_once("__") {
            Some((column, op))
                if matches!(
                    op,
                    "eq" | "ne"
                        | "lt"
                        | "lte"
                        | "gt"
                        | "gte"
                        | "null"
                        | "notnull"
                        | "startswith"
                        | "endswith"
                ) =>
            {
                (column, op)
            }
            _ => (key.as_str(), "eq"),
        };
        if column.is_empty() {
            return Err(Error::validation(format!("filter {key:?} names no column")));
        }

        let v = Value::String(value.clone());
        q = match op {
            "eq" => q.equal(column, v),
            "ne" => q.not_equal(column, v),
            "lt" => q.less_than(column, v),
            "lte" => q.less_than_or_equal(column, v),
            "gt" => q.greater_than(column, v),
            "gte" => q.greater_than_or_equal(column, v),
            "null" => q.null(column),
            "notnull" => q.not_null(column),
            "startswith" => q.starts_with(column, value),
            _ => q.ends_with(column, value),
        };
    }

    Ok(q)
}

// GET /health
pub fn health() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("health")
        .and(warp::get())
        .map(|| warp::reply::json(&json!({"status": "ok"})))
}

// GET /version
pub fn version(
    build: BuildInfo,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("version")
        .and(warp::get())
        .map(move || warp::reply::json(&build))
}

// POST /users
pub fn register_user(
    app: App,
    timeout: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("users")
        .and(warp::post())
        .then(move || {
            let app = app.clone();
            with_timeout(timeout, async move {
                let user = app.users.register().await?;
                Ok::<_, ApiError>(created(&user))
            })
        })
        .map(into_response)
}

// POST /projects
pub fn create_project(
    app: App,
    timeout: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("projects")
        .and(warp::post())
        .and(json_body())
        .then(move |body: NewProjectBody| {
            let app = app.clone();
            with_timeout(timeout, async move {
                let project = app.projects.create(body.user_id, &body.name).await?;
                Ok::<_, ApiError>(created(&project))
            })
        })
        .map(into_response)
}

// GET /projects/[id]
pub fn get_project(
    app: App,
    timeout: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("projects" / Uuid)
        .and(warp::get())
        .then(move |id: Uuid| {
            let app = app.clone();
            with_timeout(timeout, async move {
                let project = app.projects.get(id).await?;
                Ok::<_, ApiError>(warp::reply::json(&project))
            })
        })
        .map(into_response)
}

// POST /projects/[id]/collections
pub fn create_collection(
    app: App,
    timeout: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("projects" / Uuid / "collections")
        .and(warp::post())
        .and(json_body())
        .then(move |project_id: Uuid, body: NewCollectionBody| {
            let app = app.clone();
            with_timeout(timeout, async move {
                let collection = app
                    .collections
                    .create(project_id, &body.name, body.attributes)
                    .await?;
                Ok::<_, ApiError>(created(&collection))
            })
        })
        .map(into_response)
}

// POST /projects/[id]/collections/[name]/documents
pub fn create_document(
    app: App,
    timeout: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("projects" / Uuid / "collections" / String / "documents")
        .and(warp::post())
        .and(json_body())
        .then(move |project_id: Uuid, collection: String, data: Document| {
            let app = app.clone();
            with_timeout(timeout, async move {
                let document = app.documents.create(project_id, &collection, data).await?;
                Ok::<_, ApiError>(created(&document))
            })
        })
        .map(into_response)
}

// GET /projects/[id]/collections/[name]/documents?[filters]
pub fn find_document(
    app: App,
    timeout: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("projects" / Uuid / "collections" / String / "documents")
        .and(warp::get())
        .and(warp::query::<Vec<(String, String)>>())
        .then(
            move |project_id: Uuid, collection: String, params: Vec<(String, String)>| {
                let app = app.clone();
                with_timeout(timeout, async move {
                    let q = parse_filters(&params)?;
                    let document = app.documents.get(project_id, &collection, q).await?;
                    Ok::<_, ApiError>(warp::reply::json(&document))
                })
            },
        )
        .map(into_response)
}

// GET /projects/[id]/collections/[name]/documents/[id]
pub fn get_document(
    app: App,
    timeout: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("projects" / Uuid / "collections" / String / "documents" / Uuid)
        .and(warp::get())
        .then(move |project_id: Uuid, collection: String, id: Uuid| {
            let app = app.clone();
            with_timeout(timeout, async move {
                let document = app.documents.get_by_id(project_id, &collection, id).await?;
                Ok::<_, ApiError>(warp::reply::json(&document))
            })
        })
        .map(into_response)
}

// PUT /projects/[id]/collections/[name]/documents/[id]
pub fn update_document(
    app: App,
    timeout: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("projects" / Uuid / "collections" / String / "documents" / Uuid)
        .and(warp::put())
        .and(json_body())
        .then(
            move |project_id: Uuid, collection: String, id: Uuid, data: Document| {
                let app = app.clone();
                with_timeout(timeout, async move {
                    let document = app
                        .documents
                        .update(project_id, &collection, id, data)
                        .await?;
                    Ok::<_, ApiError>(warp::reply::json(&document))
                })
            },
        )
        .map(into_response)
}

// DELETE /projects/[id]/collections/[name]/documents/[id]
pub fn delete_document(
    app: App,
    timeout: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("projects" / Uuid / "collections" / String / "documents" / Uuid)
        .and(warp::delete())
        .then(move |project_id: Uuid, collection: String, id: Uuid| {
            let app = app.clone();
            with_timeout(timeout, async move {
                app.documents.delete(project_id, &collection, id).await?;
                Ok::<_, ApiError>(StatusCode::NO_CONTENT)
            })
        })
        .map(into_response)
}

pub fn filters(
    app: App,
    build: BuildInfo,
    timeout: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["Authorization", "Content-Type"])
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE"]);

    health()
        .or(version(build))
        .or(register_user(app.clone(), timeout))
        .or(create_project(app.clone(), timeout))
        .or(get_project(app.clone(), timeout))
        .or(create_collection(app.clone(), timeout))
        .or(create_document(app.clone(), timeout))
        .or(find_document(app.clone(), timeout))
        .or(get_document(app.clone(), timeout))
        .or(update_document(app.clone(), timeout))
        .or(delete_document(app, timeout))
        .with(cors)
        .with(warp::log::custom(|info| {
            info!(
                "{} {} {} {:?}",
                info.method(),
                info.path(),
                info.status().as_u16(),
                info.elapsed()
            )
        }))
}

pub async fn run_server(
    app: App,
    build: BuildInfo,
    config: HttpFrontend,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let filters = filters(app, build, config.request_timeout());

    let socket_addr: SocketAddr =
        format!("{}:{}", config.bind_host, config.bind_port).parse()?;
    let (addr, server) =
        warp::serve(filters).try_bind_with_graceful_shutdown(socket_addr, shutdown)?;

    info!("Starting the HTTP frontend on {addr}");
    server.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;
    use warp::test::request;

    use super::*;
    use crate::query::{Op, Operator};
    use crate::repository::memory::MemoryStorage;

    fn app() -> App {
        App::new(Arc::new(MemoryStorage::new()))
    }

    fn build() -> BuildInfo {
        BuildInfo::new("1.2.3", Some("abc123".to_string()))
    }

    fn body_json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[rstest]
    #[case("title", Operator::Equal)]
    #[case("title__eq", Operator::Equal)]
    #[case("title__ne", Operator::NotEqual)]
    #[case("title__lt", Operator::LessThan)]
    #[case("title__lte", Operator::LessThanOrEqual)]
    #[case("title__gt", Operator::GreaterThan)]
    #[case("title__gte", Operator::GreaterThanOrEqual)]
    #[case("title__null", Operator::IsNull)]
    #[case("title__notnull", Operator::IsNotNull)]
    #[case("title__startswith", Operator::StartsWith)]
    #[case("title__endswith", Operator::EndsWith)]
    fn test_parse_filter_operator(#[case] key: &str, #[case] expected: Operator) {
        let q = parse_filters(&[(key.to_string(), "x".to_string())]).unwrap();

        let value = expected.takes_value().then(|| json!("x"));
        assert_eq!(q.predicates(), &[Op::new("title", expected, value)]);
    }

    #[test]
    fn test_parse_filters_select_and_unknown_suffix() {
        let q = parse_filters(&[
            ("select".to_string(), "title,done".to_string()),
            ("due__date".to_string(), "2024".to_string()),
        ])
        .unwrap();

        assert_eq!(q.cols(), &["title".to_string(), "done".to_string()]);
        // Not an operator suffix, so part of the column name
        assert_eq!(
            q.predicates(),
            &[Op::new("due__date", Operator::Equal, Some(json!("2024")))]
        );

        assert!(parse_filters(&[("__eq".to_string(), "x".to_string())]).is_err());
    }

    #[tokio::test]
    async fn test_health_and_version() {
        let handler = filters(app(), build(), Duration::from_secs(5));

        let resp = request().method("GET").path("/health").reply(&handler).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp.body()), json!({"status": "ok"}));

        let resp = request().method("GET").path("/version").reply(&handler).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp.body()),
            json!({"version": "1.2.3", "commit": "abc123"})
        );
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let handler = filters(app(), build(), Duration::from_secs(5));

        let resp = request()
            .method("GET")
            .path(&format!("/projects/{}", Uuid::new_v4()))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp.body())["code"], json!("not_found"));

        let resp = request()
            .method("POST")
            .path("/projects")
            .json(&json!({"user_id": Uuid::new_v4(), "name": ""}))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp.body())["code"], json!("invalid"));
    }

    #[tokio::test]
    async fn test_project_conflict() {
        let handler = filters(app(), build(), Duration::from_secs(5));

        let resp = request().method("POST").path("/users").reply(&handler).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let user_id = body_json(resp.body())["id"].clone();

        for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
            let resp = request()
                .method("POST")
                .path("/projects")
                .json(&json!({"user_id": user_id, "name": "Acme"}))
                .reply(&handler)
                .await;
            assert_eq!(resp.status(), expected);
        }
    }
}
