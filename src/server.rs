//! HTTP endpoints.

use actix_web::{delete, get, post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::{ConversationManager, ConversationSession, ConversationTurn, SessionStore};
use crate::error::{SessionError, TurnError};
use crate::matching::CarFilter;
use crate::model::CarRecord;
use crate::respond::{APOLOGY, GREETING};

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error(status: actix_web::http::StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorBody {
        error: message.into(),
    })
}

fn session_error(err: SessionError) -> HttpResponse {
    use actix_web::http::StatusCode;
    match err {
        SessionError::NotFound(_) => error(StatusCode::NOT_FOUND, err.to_string()),
        SessionError::TurnInFlight(_) => error(StatusCode::CONFLICT, err.to_string()),
    }
}

#[derive(Deserialize)]
struct CarQuery {
    in_store: Option<bool>,
    #[serde(rename = "type")]
    car_type: Option<String>,
    min_price: Option<f64>,
    max_price: Option<f64>,
    /// Comma-separated
    keywords: Option<String>,
}

impl From<CarQuery> for CarFilter {
    fn from(query: CarQuery) -> Self {
        CarFilter {
            in_store: query.in_store.unwrap_or(false),
            car_type: query.car_type,
            min_price: query.min_price,
            max_price: query.max_price,
            keywords: query
                .keywords
                .map(|k| k.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
        }
    }
}

#[get("/cars")]
async fn list_cars(
    query: web::Query<CarQuery>,
    manager: web::Data<ConversationManager>,
) -> impl Responder {
    let filter = CarFilter::from(query.into_inner());
    HttpResponse::Ok().json(manager.engine().filter_cars(&filter))
}

#[get("/cars/{id}")]
async fn get_car(path: web::Path<String>, manager: web::Data<ConversationManager>) -> HttpResponse {
    match manager.engine().catalog().get_str(&path) {
        Some(car) => HttpResponse::Ok().json(car),
        None => error(
            actix_web::http::StatusCode::NOT_FOUND,
            format!("No car with id {}", path.as_str()),
        ),
    }
}

#[derive(Deserialize)]
struct SimilarQuery {
    limit: Option<usize>,
}

#[get("/cars/{id}/similar")]
async fn similar_cars(
    path: web::Path<String>,
    query: web::Query<SimilarQuery>,
    manager: web::Data<ConversationManager>,
) -> HttpResponse {
    let car = match manager.engine().catalog().get_str(&path) {
        Some(car) => car,
        None => {
            return error(
                actix_web::http::StatusCode::NOT_FOUND,
                format!("No car with id {}", path.as_str()),
            )
        }
    };
    let limit = query.limit.unwrap_or(manager.settings().similar_limit);
    HttpResponse::Ok().json(manager.engine().similar_available(&car, limit))
}

#[post("/match")]
async fn match_cars(
    body: web::Json<serde_json::Value>,
    manager: web::Data<ConversationManager>,
) -> impl Responder {
    let keywords = body.get("keywords").unwrap_or(&serde_json::Value::Null);
    HttpResponse::Ok().json(manager.engine().find_matching_json(keywords))
}

#[derive(Serialize)]
struct SessionCreated {
    session_id: Uuid,
    reply: &'static str,
}

#[post("/sessions")]
async fn create_session(
    manager: web::Data<ConversationManager>,
    store: web::Data<SessionStore>,
) -> impl Responder {
    let session_id = store.insert(manager.new_session());
    log::info!("Opened session {} ({} open)", session_id, store.len());
    HttpResponse::Created().json(SessionCreated {
        session_id,
        reply: GREETING,
    })
}

#[derive(Serialize)]
struct SessionView {
    session_id: Uuid,
    #[serde(flatten)]
    session: ConversationSession,
}

#[get("/sessions/{id}")]
async fn get_session(path: web::Path<Uuid>, store: web::Data<SessionStore>) -> HttpResponse {
    let session_id = path.into_inner();
    match store.snapshot(session_id) {
        Ok(session) => HttpResponse::Ok().json(SessionView {
            session_id,
            session,
        }),
        Err(e) => session_error(e),
    }
}

#[delete("/sessions/{id}")]
async fn delete_session(path: web::Path<Uuid>, store: web::Data<SessionStore>) -> HttpResponse {
    match store.remove(path.into_inner()) {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => session_error(e),
    }
}

#[derive(Deserialize)]
struct TurnRequest {
    utterance: String,
    #[serde(default)]
    concise: Option<bool>,
}

#[derive(Serialize)]
struct TurnResponse {
    reply: String,
    keywords: Vec<String>,
    reset: bool,
    matches: Vec<CarRecord>,
    history: Vec<ConversationTurn>,
}

impl TurnResponse {
    fn apology(session: &ConversationSession) -> Self {
        Self {
            reply: APOLOGY.to_string(),
            keywords: session.keywords().as_slice().to_vec(),
            reset: false,
            matches: Vec::new(),
            history: session.history().cloned().collect(),
        }
    }
}

#[post("/sessions/{id}/turns")]
async fn post_turn(
    path: web::Path<Uuid>,
    body: web::Json<TurnRequest>,
    manager: web::Data<ConversationManager>,
    store: web::Data<SessionStore>,
) -> HttpResponse {
    let session_id = path.into_inner();
    let TurnRequest { utterance, concise } = body.into_inner();
    if utterance.trim().is_empty() {
        return error(
            actix_web::http::StatusCode::BAD_REQUEST,
            TurnError::EmptyUtterance.to_string(),
        );
    }

    let lease = match store.checkout(session_id) {
        Ok(lease) => lease,
        Err(e) => return session_error(e),
    };

    // Run the turn as its own task so a panic inside it is contained here.
    let session = lease.session().clone();
    let manager = manager.into_inner();
    let task = actix_web::rt::spawn(async move {
        manager.process_turn(&session, &utterance, concise).await
    });

    match task.await {
        Ok(Ok(outcome)) => {
            let response = TurnResponse {
                reply: outcome.reply,
                keywords: outcome.session.keywords().as_slice().to_vec(),
                reset: outcome.reset,
                matches: outcome.matches,
                history: outcome.session.history().cloned().collect(),
            };
            lease.commit(outcome.session);
            HttpResponse::Ok().json(response)
        }
        Ok(Err(e)) => error(actix_web::http::StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            log::error!("Turn for session {} failed: {}", session_id, e);
            HttpResponse::Ok().json(TurnResponse::apology(lease.session()))
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_cars)
        .service(similar_cars)
        .service(get_car)
        .service(match_cars)
        .service(create_session)
        .service(get_session)
        .service(delete_session)
        .service(post_turn);
}
