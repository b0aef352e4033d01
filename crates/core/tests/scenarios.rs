mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use common::{advance, ptr, server, srv};
use zerocast_core::{
    BrowseEvent, BrowserEvent, BrowserId, EntryGroupState, GroupId, Key, Protocol, Record,
    ResolverEvent, RetryPolicy, Server, ServerState, ServiceInstance, ServiceResolution,
    TransportOp, TxtList, alternative_service_name, record::TYPE_PTR,
};

fn quiet() -> impl FnMut(&mut Server, ServerState) {
    |_s: &mut Server, _state: ServerState| {}
}

type States = Rc<RefCell<Vec<EntryGroupState>>>;

fn group_recording(server: &mut Server, states: &States) -> GroupId {
    let sink = Rc::clone(states);
    server
        .entry_group_new(move |_s: &mut Server, _g: GroupId, state: EntryGroupState| {
            sink.borrow_mut().push(state)
        })
        .unwrap()
}

fn add_http(server: &mut Server, group: GroupId, name: &str) {
    server
        .entry_group_add_service(group, None, None, name, "_http._tcp", None, None, 80, TxtList::new())
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn commit_without_competition_establishes_once() {
    let (mut server, _log) = server(quiet());
    let states = States::default();
    let group = group_recording(&mut server, &states);
    add_http(&mut server, group, "Test Service");
    server.entry_group_commit(group).unwrap();

    advance(&mut server, Duration::from_secs(3600)).await;
    assert_eq!(
        *states.borrow(),
        vec![EntryGroupState::Registering, EntryGroupState::Established]
    );
}

#[tokio::test(start_paused = true)]
async fn conflict_while_established_is_reported_without_withdrawal() {
    let (mut server, log) = server(quiet());
    let states = States::default();
    let group = group_recording(&mut server, &states);
    add_http(&mut server, group, "Test Service");
    server.entry_group_commit(group).unwrap();
    advance(&mut server, Duration::from_secs(1)).await;

    server.handle_record(
        2,
        Protocol::Inet,
        srv("Test\\ Service._http._tcp.local", 8080, "elsewhere.local"),
    );

    assert_eq!(
        *states.borrow(),
        vec![
            EntryGroupState::Registering,
            EntryGroupState::Established,
            EntryGroupState::Collision
        ]
    );
    assert_eq!(server.entry_group_state(group).unwrap(), EntryGroupState::Collision);
    assert!(!server.entry_group_is_empty(group).unwrap());
    assert!(!log.borrow().iter().any(|op| matches!(op, TransportOp::Withdraw(..))));
}

#[tokio::test(start_paused = true)]
async fn matching_remote_copy_is_not_a_conflict() {
    let (mut server, _log) = server(quiet());
    let states = States::default();
    let group = group_recording(&mut server, &states);
    add_http(&mut server, group, "Test Service");
    server.entry_group_commit(group).unwrap();

    server.handle_record(2, Protocol::Inet, srv("Test Service._http._tcp.local", 80, "zc.local"));
    server.handle_record(2, Protocol::Inet, ptr("_http._tcp.local", "Other._http._tcp.local"));
    advance(&mut server, Duration::from_secs(1)).await;
    assert_eq!(server.entry_group_state(group).unwrap(), EntryGroupState::Established);
}

/// Caller-owned publishing context; the listener renames and retries.
struct Publisher {
    name: String,
    group: Option<GroupId>,
    policy: RetryPolicy,
    collisions: u32,
    established: Vec<String>,
    gave_up: bool,
}

type Shared = Rc<RefCell<Publisher>>;

fn publisher(policy: RetryPolicy) -> Shared {
    Rc::new(RefCell::new(Publisher {
        name: "Test Service".into(),
        group: None,
        policy,
        collisions: 0,
        established: Vec::new(),
        gave_up: false,
    }))
}

fn publish(server: &mut Server, ctx: &Shared) {
    let existing = ctx.borrow().group;
    let group = match existing {
        Some(group) => group,
        None => {
            let listener_ctx = Rc::clone(ctx);
            let group = server
                .entry_group_new(move |s: &mut Server, g: GroupId, state: EntryGroupState| {
                    on_group_state(s, g, state, &listener_ctx)
                })
                .unwrap();
            ctx.borrow_mut().group = Some(group);
            group
        }
    };
    let name = ctx.borrow().name.clone();
    add_http(server, group, &name);
    server.entry_group_commit(group).unwrap();
}

fn on_group_state(server: &mut Server, group: GroupId, state: EntryGroupState, ctx: &Shared) {
    match state {
        EntryGroupState::Established => {
            let name = ctx.borrow().name.clone();
            ctx.borrow_mut().established.push(name);
        }
        EntryGroupState::Collision => {
            let retry = {
                let mut c = ctx.borrow_mut();
                c.collisions += 1;
                c.policy.delay_for_attempt(c.collisions)
            };
            if retry.is_none() {
                ctx.borrow_mut().gave_up = true;
                server.entry_group_free(group);
                return;
            }
            server.entry_group_reset(group).unwrap();
            {
                let mut c = ctx.borrow_mut();
                c.name = alternative_service_name(&c.name);
            }
            publish(server, ctx);
        }
        _ => {}
    }
}

#[tokio::test(start_paused = true)]
async fn collision_listener_renames_and_reestablishes() {
    let (mut server, log) = server(quiet());
    let ctx = publisher(RetryPolicy::default());
    publish(&mut server, &ctx);
    advance(&mut server, Duration::from_secs(1)).await;

    server.handle_record(
        2,
        Protocol::Inet,
        srv("Test Service._http._tcp.local", 8080, "elsewhere.local"),
    );
    assert_eq!(ctx.borrow().name, "Test Service #2");

    advance(&mut server, Duration::from_secs(1)).await;
    assert_eq!(
        ctx.borrow().established,
        vec!["Test Service".to_string(), "Test Service #2".to_string()]
    );
    assert!(log.borrow().iter().any(|op| matches!(
        op,
        TransportOp::Announce(_, r) if r.name() == "Test Service #2._http._tcp.local"
    )));
}

#[tokio::test(start_paused = true)]
async fn bounded_policy_gives_up() {
    let (mut server, log) = server(quiet());
    let ctx = publisher(RetryPolicy::bounded(1));
    publish(&mut server, &ctx);

    server.handle_record(2, Protocol::Inet, srv("Test Service._http._tcp.local", 1, "a.local"));
    server.handle_record(2, Protocol::Inet, srv("Test Service #2._http._tcp.local", 2, "b.local"));

    let c = ctx.borrow();
    assert!(c.gave_up);
    assert_eq!(c.collisions, 2);
    assert!(c.established.is_empty());
    let group = c.group.unwrap();
    drop(c);
    assert!(server.entry_group_state(group).is_err());

    let last_withdraw = log
        .borrow()
        .iter()
        .rev()
        .find_map(|op| match op {
            TransportOp::Withdraw(_, r) if r.rtype() == zerocast_core::record::TYPE_SRV => {
                Some(r.name().to_string())
            }
            _ => None,
        });
    assert_eq!(last_withdraw.as_deref(), Some("Test Service #2._http._tcp.local"));
}

#[tokio::test(start_paused = true)]
async fn unanswered_service_resolver_times_out_once() {
    let (mut server, _log) = server(quiet());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let id = server
        .service_resolver_new(
            None,
            None,
            "Nobody",
            "_http._tcp",
            None,
            None,
            move |_s: &mut Server, _id: BrowserId, ev: ResolverEvent<ServiceResolution>| {
                sink.borrow_mut().push(ev)
            },
        )
        .unwrap();

    advance(&mut server, Duration::from_millis(4999)).await;
    assert!(seen.borrow().is_empty());
    advance(&mut server, Duration::from_millis(1)).await;
    advance(&mut server, Duration::from_secs(60)).await;

    assert_eq!(*seen.borrow(), vec![ResolverEvent::Timeout]);
    assert!(!server.browser_is_live(id));
}

#[tokio::test(start_paused = true)]
async fn browser_freed_in_its_own_callback_gets_nothing_more() {
    let (mut server, _log) = server(quiet());
    server.handle_record(1, Protocol::Inet, ptr("_http._tcp.local", "A._http._tcp.local"));
    server.handle_record(1, Protocol::Inet, ptr("_http._tcp.local", "B._http._tcp.local"));

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let id = server
        .service_browser_new(
            None,
            None,
            "_http._tcp",
            None,
            move |s: &mut Server, id: BrowserId, ev: BrowseEvent<ServiceInstance>| {
                sink.borrow_mut().push(ev.item.name.clone());
                s.browser_free(id);
            },
        )
        .unwrap();

    server.handle_record(1, Protocol::Inet, ptr("_http._tcp.local", "C._http._tcp.local"));
    server.browser_free(id);

    assert_eq!(seen.borrow().len(), 1);
    assert!(!server.browser_is_live(id));
}

#[tokio::test(start_paused = true)]
async fn events_alternate_per_identity() {
    let (mut server, log) = server(quiet());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let key = Key::in_class("_http._tcp.local", TYPE_PTR);
    let id = server
        .record_browser_new(
            None,
            None,
            key.clone(),
            move |_s: &mut Server, _id: BrowserId, ev: BrowseEvent<Record>| {
                sink.borrow_mut().push(ev.event)
            },
        )
        .unwrap();

    let record = ptr("_http._tcp.local", "A._http._tcp.local");
    server.handle_record(1, Protocol::Inet, record.clone());
    server.handle_record(1, Protocol::Inet, record.clone());
    server.handle_record(1, Protocol::Inet, record.with_ttl(0));
    server.handle_record(1, Protocol::Inet, record.with_ttl(0));
    server.handle_withdrawn(1, Protocol::Inet, &record);
    server.handle_record(1, Protocol::Inet, record.clone());

    assert_eq!(
        *seen.borrow(),
        vec![BrowserEvent::New, BrowserEvent::Remove, BrowserEvent::New]
    );

    server.browser_free(id);
    server.browser_free(id);
    let cancels = log
        .borrow()
        .iter()
        .filter(|op| matches!(op, TransportOp::CancelQuery(_, k) if *k == key))
        .count();
    assert_eq!(cancels, 1);
}
