//! Dispatch engine tests: mapping order, redirections, chaining and the
//! error path, driven in-process through the response channel.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, StatusCode};
use futures_util::StreamExt;
use reserve::dispatch::{IncomingRequest, ResponseWriter};
use reserve::error::{HandlerError, ListenerError};
use reserve::events::ErrorReason;
use reserve::handlers::custom::custom;
use reserve::mapping::IfMatch;
use reserve::{Event, EventKind, Mapping, Outcome, Settings, Target};
use tokio::sync::Notify;

use common::EventRecorder;

fn error_reasons(recorder: &EventRecorder) -> Vec<ErrorReason> {
    recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Error { reason, .. } => Some(reason),
            _ => None,
        })
        .collect()
}

fn buggy<T>(message: &'static str) -> Result<T, HandlerError> {
    panic!("{message}")
}

fn redirected_statuses(recorder: &EventRecorder) -> Vec<u16> {
    recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Redirected { status_code, .. } => Some(status_code),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn custom_redirect_serves_file() {
    let dispatcher = common::dispatcher_with(
        common::site("dispatch-file"),
        vec![
            Mapping::new()
                .method("GET")
                .matching("^/redirect")
                .custom(custom(|_| async { Ok(Outcome::from("/file.txt")) }))
                .into(),
            Mapping::new().matching("^/(.*)").file("$1").into(),
        ],
    )
    .await;
    let recorder = EventRecorder::attach(dispatcher.events());

    let reply = common::get(&dispatcher, "/redirect").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), "Hello World!");
    assert_eq!(recorder.handler_types(), vec!["custom", "file"]);
    assert_eq!(redirected_statuses(&recorder), vec![200]);
    assert_eq!(recorder.count(EventKind::Incoming), 1);
    assert_eq!(recorder.count(EventKind::Error), 0);
    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn unmatched_url_is_not_implemented() {
    let dispatcher = common::dispatcher(vec![Mapping::new().matching("^/known").status(204).into()]).await;
    let recorder = EventRecorder::attach(dispatcher.events());

    let reply = common::get(&dispatcher, "/unknown").await;

    assert_eq!(reply.status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(error_reasons(&recorder), vec![ErrorReason::Status(501)]);
    assert_eq!(recorder.handler_types(), vec!["status"]);
    assert_eq!(redirected_statuses(&recorder), vec![501]);
}

#[tokio::test]
async fn redirect_loop_is_detected() {
    let dispatcher = common::dispatcher(vec![
        Mapping::new()
            .matching("^/A$")
            .custom(custom(|_| async { Ok(Outcome::from("/B")) }))
            .into(),
        Mapping::new()
            .matching("^/B$")
            .custom(custom(|_| async { Ok(Outcome::from("/A")) }))
            .into(),
    ])
    .await;
    let recorder = EventRecorder::attach(dispatcher.events());
    let max_redirect = dispatcher.configuration().settings().max_redirect;

    let reply = common::get(&dispatcher, "/A").await;

    assert_eq!(reply.status, StatusCode::LOOP_DETECTED);
    let types = recorder.handler_types();
    assert_eq!(types.iter().filter(|t| *t == "custom").count(), max_redirect + 1);
    assert_eq!(types.last().map(String::as_str), Some("status"));
    assert_eq!(error_reasons(&recorder), vec![ErrorReason::Status(508)]);
}

#[tokio::test]
async fn lower_max_redirect_stops_earlier() {
    let settings = Settings {
        max_redirect: 2,
        ..Settings::default()
    };
    let dispatcher = common::dispatcher_with(
        settings,
        vec![Mapping::new()
            .matching("^/loop$")
            .custom(custom(|_| async { Ok(Outcome::from("/loop")) }))
            .into()],
    )
    .await;
    let recorder = EventRecorder::attach(dispatcher.events());

    let reply = common::get(&dispatcher, "/loop").await;

    assert_eq!(reply.status, StatusCode::LOOP_DETECTED);
    assert_eq!(recorder.handler_types(), vec!["custom", "custom", "custom", "status"]);
}

#[tokio::test]
async fn first_matching_mapping_wins() {
    let dispatcher = common::dispatcher(vec![
        Mapping::new().matching("^/x").status(201).into(),
        Mapping::new().matching("^/x").status(202).into(),
    ])
    .await;

    assert_eq!(common::get(&dispatcher, "/x").await.status, StatusCode::CREATED);
}

#[tokio::test]
async fn method_restriction_skips_mapping() {
    let dispatcher = common::dispatcher(vec![
        Mapping::new().method("POST").matching("^/form").status(201).into(),
        Mapping::new().matching("^/form").status(405).into(),
    ])
    .await;

    let post = common::request(&dispatcher, Method::POST, "/form").await;
    assert_eq!(post.status, StatusCode::CREATED);
    let get = common::get(&dispatcher, "/form").await;
    assert_eq!(get.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn inverted_match_applies_to_other_urls() {
    let dispatcher = common::dispatcher(vec![
        Mapping::new().matching("^/public").invert_match(true).status(403).into(),
        Mapping::new().matching("^/public").status(200).into(),
    ])
    .await;

    assert_eq!(common::get(&dispatcher, "/private").await.status, StatusCode::FORBIDDEN);
    assert_eq!(common::get(&dispatcher, "/public/a").await.status, StatusCode::OK);
}

#[tokio::test]
async fn open_response_chains_to_next_mapping() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let dispatcher = common::dispatcher_with(
        common::site("dispatch-chain"),
        vec![
            Mapping::new()
                .custom(custom(move |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Outcome::Handled)
                    }
                }))
                .into(),
            Mapping::new().matching("^/(.*)").file("$1").into(),
        ],
    )
    .await;
    let recorder = EventRecorder::attach(dispatcher.events());

    let reply = common::get(&dispatcher, "/file.txt").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), "Hello World!");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.handler_types(), vec!["custom", "file"]);
}

#[tokio::test]
async fn if_match_can_reject_or_redirect() {
    let dispatcher = common::dispatcher(vec![
        Mapping::new()
            .matching("^/old")
            .if_match(|_, _, _| async { Ok(IfMatch::Redirect(Target::Url("/new".into()))) })
            .status(500)
            .into(),
        Mapping::new()
            .matching("^/")
            .if_match(|_, url, _| async move {
                Ok(if url == "/new" {
                    IfMatch::Accept
                } else {
                    IfMatch::Reject
                })
            })
            .status(204)
            .into(),
        Mapping::new().status(404).into(),
    ])
    .await;
    let recorder = EventRecorder::attach(dispatcher.events());

    assert_eq!(common::get(&dispatcher, "/old").await.status, StatusCode::NO_CONTENT);
    // if-match redirections do not go through a handler.
    assert_eq!(recorder.handler_types(), vec!["status"]);

    assert_eq!(common::get(&dispatcher, "/other").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn handler_failure_renders_500() {
    let dispatcher = common::dispatcher(vec![Mapping::new()
        .custom(custom(|_| async { Err(HandlerError::message("boom")) }))
        .into()])
    .await;
    let recorder = EventRecorder::attach(dispatcher.events());

    let reply = common::get(&dispatcher, "/").await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_reasons(&recorder), vec![ErrorReason::Failure("boom".into())]);
}

#[tokio::test]
async fn handler_status_error_keeps_its_code() {
    let dispatcher = common::dispatcher(vec![Mapping::new()
        .custom(custom(|_| async { Err(HandlerError::Status(403)) }))
        .into()])
    .await;
    let recorder = EventRecorder::attach(dispatcher.events());

    let reply = common::get(&dispatcher, "/").await;

    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(error_reasons(&recorder), vec![ErrorReason::Status(403)]);
}

#[tokio::test]
async fn failing_listeners_do_not_affect_dispatch() {
    let dispatcher = common::dispatcher(vec![Mapping::new().status(204).into()]).await;
    dispatcher
        .events()
        .subscribe(EventKind::Redirecting, |_| Err(ListenerError::new("listener down")));
    dispatcher
        .events()
        .subscribe(EventKind::Incoming, |_| panic!("listener panicked"));
    let recorder = EventRecorder::attach(dispatcher.events());

    let reply = common::get(&dispatcher, "/anything").await;

    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert_eq!(recorder.count(EventKind::Error), 0);
    assert_eq!(recorder.count(EventKind::Redirected), 1);
}

#[tokio::test]
async fn shutting_down_answers_503() {
    let dispatcher = common::dispatcher(vec![Mapping::new().status(200).into()]).await;
    dispatcher.begin_shutdown();
    let recorder = EventRecorder::attach(dispatcher.events());

    let reply = common::get(&dispatcher, "/").await;

    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_reasons(&recorder), vec![ErrorReason::Status(503)]);
}

#[tokio::test]
async fn failure_after_head_terminates_response() {
    let dispatcher = common::dispatcher(vec![Mapping::new()
        .custom(custom(|context| async move {
            context.response.write_head(StatusCode::OK, HeaderMap::new())?;
            context.response.write("partial").await?;
            Err::<Outcome, _>(HandlerError::message("lost the upstream"))
        }))
        .into()])
    .await;
    let recorder = EventRecorder::attach(dispatcher.events());

    let reply = common::get(&dispatcher, "/").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.is_none(), "body should be cut short");
    // The handler failure, then the status handler failing on a sent head.
    assert_eq!(recorder.count(EventKind::Error), 2);
}

#[tokio::test]
async fn failing_if_match_renders_500() {
    let dispatcher = common::dispatcher(vec![Mapping::new()
        .if_match(|_, _, _| async { Err(HandlerError::message("lookup failed")) })
        .status(200)
        .into()])
    .await;
    let recorder = EventRecorder::attach(dispatcher.events());

    let reply = common::get(&dispatcher, "/").await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_reasons(&recorder), vec![ErrorReason::Failure("lookup failed".into())]);
    assert_eq!(recorder.handler_types(), vec!["status"]);
}

#[tokio::test]
async fn panicking_handler_renders_500_and_releases_registry() {
    let dispatcher = common::dispatcher(vec![Mapping::new()
        .custom(custom(|_| async { buggy::<Outcome>("handler bug") }))
        .into()])
    .await;
    let recorder = EventRecorder::attach(dispatcher.events());

    let reply = common::get(&dispatcher, "/").await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        error_reasons(&recorder),
        vec![ErrorReason::Failure("handler panicked: handler bug".into())]
    );
    assert_eq!(redirected_statuses(&recorder), vec![500]);
    assert!(dispatcher.registry().is_empty());

    dispatcher
        .set_mappings(vec![Mapping::new().status(204).into()], Some(Duration::from_millis(200)))
        .await
        .expect("a panicked request must not hold updates");
    assert_eq!(common::get(&dispatcher, "/").await.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn panicking_if_match_renders_500() {
    let dispatcher = common::dispatcher(vec![Mapping::new()
        .if_match(|_, _, _| async { buggy::<IfMatch>("predicate bug") })
        .status(200)
        .into()])
    .await;

    let reply = common::get(&dispatcher, "/").await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn client_close_mid_stream_ends_with_closed() {
    let streaming = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let dispatcher = common::dispatcher(vec![Mapping::new()
        .custom(custom({
            let streaming = streaming.clone();
            let release = release.clone();
            move |context| {
                let streaming = streaming.clone();
                let release = release.clone();
                async move {
                    context.response.write_head(StatusCode::OK, HeaderMap::new())?;
                    context.response.write("first").await?;
                    streaming.notify_one();
                    release.notified().await;
                    context.response.write("second").await?;
                    context.response.end().await?;
                    Ok(Outcome::Handled)
                }
            }
        }))
        .into()])
    .await;
    let recorder = EventRecorder::attach(dispatcher.events());

    let (incoming, guard) = IncomingRequest::new(Method::GET, "/", HeaderMap::new(), Body::empty());
    let (writer, receiver) = ResponseWriter::channel();
    let task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.handle(incoming, writer).await }
    });

    let response = receiver.into_response(guard).await;
    let mut body = response.into_body().into_data_stream();
    assert_eq!(body.next().await.unwrap().unwrap(), "first");
    streaming.notified().await;
    // The client goes away with the response half sent.
    drop(body);
    release.notify_one();
    task.await.unwrap();

    assert_eq!(
        recorder.kinds(),
        vec![EventKind::Incoming, EventKind::Redirecting, EventKind::Error, EventKind::Closed]
    );
    assert_eq!(recorder.handler_types(), vec!["custom"]);
    assert!(dispatcher.registry().is_empty());
}

#[tokio::test]
async fn missing_file_is_404() {
    let dispatcher = common::dispatcher_with(
        common::site("dispatch-missing"),
        vec![Mapping::new().matching("^/(.*)").file("$1").into()],
    )
    .await;

    let reply = common::get(&dispatcher, "/nothing-here.txt").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn head_request_sends_no_body() {
    let dispatcher = common::dispatcher_with(
        common::site("dispatch-head"),
        vec![Mapping::new().matching("^/(.*)").file("$1").into()],
    )
    .await;

    let reply = common::request(&dispatcher, Method::HEAD, "/file.txt").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers.get(header::CONTENT_LENGTH).unwrap(), "12");
    assert_eq!(reply.body.as_deref(), Some(&b""[..]));
}

#[tokio::test]
async fn aborted_request_skips_handlers() {
    let dispatcher = common::dispatcher(vec![Mapping::new().status(200).into()]).await;
    let recorder = EventRecorder::attach(dispatcher.events());

    let (incoming, guard) = IncomingRequest::new(Method::GET, "/", HeaderMap::new(), Body::empty());
    let (writer, _receiver) = ResponseWriter::channel();
    drop(guard);
    dispatcher.handle(incoming, writer).await;

    assert!(recorder.handler_types().is_empty());
    assert_eq!(recorder.count(EventKind::Aborted), 1);
    assert_eq!(recorder.count(EventKind::Redirected), 0);
    assert!(dispatcher.registry().is_empty());
}
