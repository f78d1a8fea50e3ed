use super::engine::{worker, Event, MockEngine, MockReq};
use crate::log::LogLevel;
use crate::*;
use bytes::Bytes;

fn done(child: ReqId, body: &'static [u8]) -> SubrequestResult {
    SubrequestResult {
        child,
        rc: 0,
        status: 200,
        body: Bytes::from_static(body),
    }
}

// Handler at location 10 issues one subrequest and waits.  The
// callback echoes the child's body.
fn proxy_routes() -> std::sync::Arc<Routes<Vec<String>>> {
    Routes::<Vec<String>>::builder()
        .handler(10, |req| {
            let sub = Subrequest::new(Method::Post, "/backend")
                .args("q=1")
                .header("X-Trace", "t1")
                .body_copied(b"payload");
            req.send_request(sub, |req, resp| {
                req.data_mut()
                    .push(format!("{} {} {}", resp.child, resp.status, resp.rc));
                req.status(resp.status)?;
                Ok(req.end_bytes(resp.body)?)
            })?;
            Ok(Outcome::Async)
        })
        .handler(11, |req| {
            req.send_request(Subrequest::new(Method::Get, "/fail"), |_, _| {
                Err(anyhow::anyhow!("bad child response"))
            })?;
            Ok(Outcome::Async)
        })
        .handler(12, |req| {
            req.send_request(Subrequest::new(Method::Get, "/wait"), |req, _| {
                req.data_mut().push("still waiting".into());
                Ok(Outcome::Async)
            })?;
            Ok(Outcome::Async)
        })
        .build()
        .unwrap()
}

#[test]
fn completes_root() {
    let engine = MockEngine::new().with(1, MockReq::new(10, "/front"));
    let (mut cx, rec, _) = worker(engine, proxy_routes(), Vec::new());

    assert_eq!(ContentPhase::Done, cx.content_phase(ReqId(1)));
    assert_eq!(1, cx.live_subrequests());
    let (child, token) = rec.borrow().pending[0];
    assert_eq!(
        rec.borrow().events,
        vec![Event::Subrequest {
            parent: ReqId(1),
            child,
            uri: "/backend".into(),
            body: Some(b"payload".to_vec()),
            headers: vec![("X-Trace".into(), "t1".into())],
        }]
    );
    assert!(rec.borrow().finalized().is_empty());

    cx.subrequest_done(token, done(child, b"from child"));
    assert_eq!(0, cx.live_subrequests());
    assert_eq!(vec![format!("{} 200 0", child)], *cx.data());

    let rec = rec.borrow();
    let r = ReqId(1);
    assert_eq!(
        rec.events[1..],
        [
            Event::Status(r, 200),
            Event::ContentLength(r, 10),
            Event::SendHeader(r),
            Event::Output(
                r,
                OutChunk {
                    data: Bytes::from_static(b"from child"),
                    flush: false,
                    last: true
                }
            ),
            Event::Finalize(r, 0),
        ]
    );
}

#[test]
fn callback_error_finalizes_500() {
    let engine = MockEngine::new().with(1, MockReq::new(11, "/front"));
    let (mut cx, rec, _) = worker(engine, proxy_routes(), Vec::new());
    cx.content_phase(ReqId(1));
    let (child, token) = rec.borrow().pending[0];

    cx.subrequest_done(token, done(child, b""));
    assert_eq!(0, cx.live_subrequests());
    let rec = rec.borrow();
    assert_eq!(vec![(ReqId(1), 500)], rec.finalized());
    assert_eq!(1, rec.logged(LogLevel::Error, "bad child response"));
}

#[test]
fn callback_async_leaves_request_open() {
    let engine = MockEngine::new().with(1, MockReq::new(12, "/front"));
    let (mut cx, rec, _) = worker(engine, proxy_routes(), Vec::new());
    cx.content_phase(ReqId(1));
    let (child, token) = rec.borrow().pending[0];

    cx.subrequest_done(token, done(child, b""));
    assert_eq!(0, cx.live_subrequests());
    assert_eq!(vec!["still waiting"], *cx.data());
    assert!(rec.borrow().finalized().is_empty());
    assert_eq!(Some(Phase::Suspended), cx.request(ReqId(1)).map(|r| r.phase()));
}

#[test]
fn creation_failure() {
    let engine = MockEngine::new().with(1, MockReq::new(10, "/front"));
    let rec = engine.recorder();
    rec.borrow_mut().fail_subrequest = true;
    let (mut cx, _, _) = worker(engine, proxy_routes(), Vec::new());

    cx.content_phase(ReqId(1));
    assert_eq!(0, cx.live_subrequests());
    let rec = rec.borrow();
    assert_eq!(vec![(ReqId(1), 500)], rec.finalized());
    assert_eq!(1, rec.logged(LogLevel::Error, "failed to create subrequest"));
    assert_eq!(
        1,
        rec.logged(
            LogLevel::Error,
            "create subrequest failed: engine returned -1"
        )
    );
}

#[test]
#[should_panic(expected = "fired twice")]
fn completion_twice_panics() {
    let engine = MockEngine::new().with(1, MockReq::new(12, "/front"));
    let (mut cx, rec, _) = worker(engine, proxy_routes(), Vec::new());
    cx.content_phase(ReqId(1));
    let (child, token) = rec.borrow().pending[0];
    cx.subrequest_done(token, done(child, b""));
    cx.subrequest_done(token, done(child, b""));
}

// Callback runs against the given main request, then root is finalized
// first and main second with the same code
#[test]
fn explicit_main() {
    let routes = Routes::<Vec<String>>::builder()
        .handler(20, |_| Ok(Outcome::Async))
        .handler(21, |req| {
            let sub = Subrequest::new(Method::Get, "/x").main(ReqId(2));
            req.send_request(sub, |req, _| {
                let id = req.id().to_string();
                req.data_mut().push(id);
                Ok(Outcome::Status(204))
            })?;
            Ok(Outcome::Async)
        })
        .build()
        .unwrap();
    let engine = MockEngine::new()
        .with(2, MockReq::new(20, "/waiting"))
        .with(3, MockReq::new(21, "/issuer"));
    let (mut cx, rec, _) = worker(engine, routes, Vec::new());

    cx.content_phase(ReqId(2));
    cx.content_phase(ReqId(3));
    let (child, token) = rec.borrow().pending[0];
    cx.subrequest_done(token, done(child, b""));

    assert_eq!(vec!["#2"], *cx.data());
    assert_eq!(
        vec![(ReqId(3), 204), (ReqId(2), 204)],
        rec.borrow().finalized()
    );
    assert_eq!(0, cx.live_subrequests());
}

#[test]
fn caller_released_before_completion() {
    let engine = MockEngine::new().with(1, MockReq::new(10, "/front"));
    let (mut cx, rec, _) = worker(engine, proxy_routes(), Vec::new());
    cx.content_phase(ReqId(1));
    let (child, token) = rec.borrow().pending[0];

    cx.request_released(ReqId(1));
    cx.subrequest_done(token, done(child, b""));
    assert_eq!(0, cx.live_subrequests());
    assert!(cx.data().is_empty());
    let rec = rec.borrow();
    assert!(rec.finalized().is_empty());
    assert_eq!(1, rec.logged(LogLevel::Warn, "caller went away"));
}

#[test]
fn anchor_host() {
    let routes = Routes::<Vec<String>>::builder().build().unwrap();
    let (mut cx, rec, _) = worker(MockEngine::new(), routes, Vec::new());

    let anchor = cx.new_anchor(1).unwrap();
    let token = {
        let mut req = cx.request(anchor).unwrap();
        assert!(req.is_anchor());
        assert_eq!(Phase::Handling, req.phase());
        req.send_request(Subrequest::new(Method::Get, "/refresh"), |req, resp| {
            req.data_mut()
                .push(String::from_utf8_lossy(&resp.body).into_owned());
            Ok(Outcome::Ok)
        })
        .unwrap()
    };
    let (child, pending) = rec.borrow().pending[0];
    assert_eq!(token, pending);
    assert!(rec.borrow().events.contains(&Event::RunPosted(anchor)));

    cx.subrequest_done(token, done(child, b"fresh"));
    assert_eq!(vec!["fresh"], *cx.data());
    assert_eq!(vec![(anchor, 0)], rec.borrow().finalized());
    assert_eq!(0, cx.live_subrequests());
}

// Main request goes away before the child completes.  The callback is
// skipped, but the anchor at the root of the chain is still finalized.
#[test]
fn anchor_root_finalized_when_main_released() {
    let routes = Routes::<Vec<String>>::builder()
        .handler(20, |_| Ok(Outcome::Async))
        .build()
        .unwrap();
    let engine = MockEngine::new().with(2, MockReq::new(20, "/waiting"));
    let (mut cx, rec, _) = worker(engine, routes, Vec::new());
    cx.content_phase(ReqId(2));

    let anchor = cx.new_anchor(1).unwrap();
    let token = {
        let mut req = cx.request(anchor).unwrap();
        let sub = Subrequest::new(Method::Get, "/x").main(ReqId(2));
        req.send_request(sub, |req, _| {
            req.data_mut().push("callback".into());
            Ok(Outcome::Ok)
        })
        .unwrap()
    };
    let (child, _) = rec.borrow().pending[0];

    cx.request_released(ReqId(2));
    cx.subrequest_done(token, done(child, b""));

    assert!(cx.data().is_empty());
    assert_eq!(0, cx.live_subrequests());
    assert_eq!(Some(Phase::Finalized), cx.request(anchor).map(|r| r.phase()));
    let rec = rec.borrow();
    assert_eq!(vec![(anchor, 500)], rec.finalized());
    assert_eq!(1, rec.logged(LogLevel::Warn, "caller went away"));
}

// Engine completes the child inside `run_posted`, while the anchor's
// worker is still borrowed, and defers the completion through the task
// queue
#[test]
fn completion_during_run_posted() {
    let routes = Routes::<Vec<String>>::builder().build().unwrap();
    let (mut cx, rec, _) = worker(MockEngine::new(), routes, Vec::new());
    let remote = cx.remote();
    let complete = move |token: SubToken, result: SubrequestResult| {
        assert!(remote.execute(move |cx| cx.subrequest_done(token, result)));
    };
    rec.borrow_mut().complete_posted = Some(Box::new(complete));

    let anchor = cx.new_anchor(1).unwrap();
    {
        let mut req = cx.request(anchor).unwrap();
        req.send_request(Subrequest::new(Method::Get, "/cached"), |req, resp| {
            req.data_mut()
                .push(String::from_utf8_lossy(&resp.body).into_owned());
            Ok(Outcome::Ok)
        })
        .unwrap();
    }
    assert!(rec.borrow().pending.is_empty());
    assert!(cx.data().is_empty());
    assert_eq!(1, cx.live_subrequests());
    assert!(rec.borrow().finalized().is_empty());

    assert_eq!(1, cx.tick());
    assert_eq!(vec!["posted"], *cx.data());
    assert_eq!(vec![(anchor, 0)], rec.borrow().finalized());
    assert_eq!(0, cx.live_subrequests());
}

#[test]
fn anchor_failure() {
    let engine = MockEngine::new();
    engine.recorder().borrow_mut().fail_anchor = true;
    let routes = Routes::<()>::builder().build().unwrap();
    let (mut cx, _, _) = worker(engine, routes, ());
    match cx.new_anchor(1) {
        Err(Error::Engine { rc: -1, .. }) => (),
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(0, cx.active_requests());
}

// Many subrequests completing in a pseudo-random order all release
// their state
#[test]
fn many_out_of_order() {
    const N: usize = 50;
    let routes = Routes::<Vec<String>>::builder().build().unwrap();
    let (mut cx, rec, _) = worker(MockEngine::new(), routes, Vec::new());

    let mut anchors = Vec::new();
    for i in 0..N {
        let anchor = cx.new_anchor(1).unwrap();
        anchors.push(anchor);
        let sub = Subrequest::new(Method::Get, format!("/item/{}", i));
        let mut req = cx.request(anchor).unwrap();
        req.send_request(sub, move |req, _| {
            req.data_mut().push(format!("{}", i));
            Ok(if i % 3 == 0 {
                Outcome::Status(503)
            } else {
                Outcome::Ok
            })
        })
        .unwrap();
    }
    assert_eq!(N, cx.live_subrequests());

    // ZX Spectrum 16-bit pseudo-random number generator
    let mut seed: usize = 12345;
    let mut rand = |n: usize| {
        seed = ((seed + 1) * 75) % 65537 - 1;
        (seed * n) >> 16
    };
    let mut pending = rec.borrow().pending.clone();
    while !pending.is_empty() {
        let (child, token) = pending.swap_remove(rand(pending.len()));
        cx.subrequest_done(token, done(child, b""));
    }

    assert_eq!(0, cx.live_subrequests());
    assert_eq!(N, cx.data().len());
    let finalized = rec.borrow().finalized();
    assert_eq!(N, finalized.len());
    for (i, anchor) in anchors.iter().enumerate() {
        let rc = if i % 3 == 0 { 503 } else { 0 };
        assert!(finalized.contains(&(*anchor, rc)));
    }
}
