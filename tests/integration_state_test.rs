// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Router lifecycle: transition table and control signals

use mcrouter::{
    ControlSignal, DescriptorCatalog, RouterSettings, RouterState, RouterStateMachine,
    spawn_router,
};
use tokio_util::sync::CancellationToken;

/// Legal path from `Stopped` to `target`
fn path_to(target: RouterState) -> Vec<RouterState> {
    use RouterState::*;
    match target {
        Stopped => vec![],
        Starting => vec![Starting],
        Running => vec![Starting, Running],
        Pausing => vec![Starting, Running, Pausing],
        Paused => vec![Starting, Running, Pausing, Paused],
        Continuing => vec![Starting, Running, Pausing, Paused, Continuing],
        Stopping => vec![Starting, Running, Stopping],
    }
}

fn machine_in(state: RouterState) -> RouterStateMachine {
    let mut machine = RouterStateMachine::new();
    for step in path_to(state) {
        assert!(machine.set_state(step));
    }
    assert_eq!(machine.state(), state);
    machine
}

#[test]
fn test_every_state_pair_follows_the_table() {
    let table = [
        (RouterState::Stopped, RouterState::Starting),
        (RouterState::Starting, RouterState::Running),
        (RouterState::Running, RouterState::Pausing),
        (RouterState::Running, RouterState::Stopping),
        (RouterState::Pausing, RouterState::Paused),
        (RouterState::Paused, RouterState::Continuing),
        (RouterState::Continuing, RouterState::Running),
        (RouterState::Stopping, RouterState::Stopped),
    ];

    for from in RouterState::ALL {
        for to in RouterState::ALL {
            let mut machine = machine_in(from);
            let mut watch = machine.watch();

            let legal = table.contains(&(from, to));
            assert_eq!(machine.set_state(to), legal, "{} -> {}", from, to);
            if legal {
                assert_eq!(machine.state(), to);
                assert!(watch.has_changed().unwrap());
                assert_eq!(*watch.borrow_and_update(), to);
            } else {
                assert_eq!(machine.state(), from);
                assert!(!watch.has_changed().unwrap());
            }
        }
    }
}

#[tokio::test]
async fn test_pause_rejects_stop_until_continued() {
    let quit = CancellationToken::new();
    let (router, _task) = spawn_router(
        RouterSettings {
            listen_address: Some("127.0.0.1:0".to_string()),
            ..RouterSettings::default()
        },
        DescriptorCatalog::new(),
        quit.clone(),
    );

    assert!(router.control(ControlSignal::Start).await.unwrap());
    assert_eq!(router.state().await.unwrap(), RouterState::Running);

    assert!(router.control(ControlSignal::Pause).await.unwrap());
    assert_eq!(router.state().await.unwrap(), RouterState::Paused);
    assert!(router.listen_address().await.unwrap().is_none());

    assert!(!router.control(ControlSignal::Stop).await.unwrap());
    assert_eq!(router.state().await.unwrap(), RouterState::Paused);
    assert!(!router.control(ControlSignal::Pause).await.unwrap());
    assert!(!quit.is_cancelled());

    assert!(router.control(ControlSignal::Continue).await.unwrap());
    assert_eq!(router.state().await.unwrap(), RouterState::Running);
    assert!(router.listen_address().await.unwrap().is_some());

    assert!(router.control(ControlSignal::Stop).await.unwrap());
    assert_eq!(router.state().await.unwrap(), RouterState::Stopped);
    assert!(quit.is_cancelled());
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let (router, _task) = spawn_router(
        RouterSettings::default(),
        DescriptorCatalog::new(),
        CancellationToken::new(),
    );
    assert!(router.control(ControlSignal::Start).await.unwrap());
    assert!(!router.control(ControlSignal::Start).await.unwrap());
    assert!(!router.control(ControlSignal::Continue).await.unwrap());
    assert_eq!(router.state().await.unwrap(), RouterState::Running);
}
