//! Dioxus integration: mount a [`SessionBinder`] for a view tree.
//!
//! The app provides an `Arc<Realtime>` context once at the root, then wraps
//! its authenticated layout in [`RealtimeProvider`]. Views below reach the
//! adapters with [`use_realtime`].

use std::sync::Arc;

use dioxus::prelude::*;

use crate::adapters::Channels;
use crate::binder::{BinderState, SessionBinder};
use crate::config::RealtimeConfig;
use crate::realtime::Realtime;
use crate::session::SessionSnapshot;

/// Binds the realtime layer to `session` for as long as it is mounted.
#[component]
pub fn RealtimeProvider(session: Signal<SessionSnapshot>, children: Element) -> Element {
    let binder = use_hook(|| {
        let realtime = try_consume_context::<Arc<Realtime>>().unwrap_or_else(|| {
            tracing::error!("RealtimeProvider mounted without a Realtime context; live updates off");
            Realtime::detached(RealtimeConfig::new("unconfigured"))
        });
        SessionBinder::new(realtime)
    });
    let state = use_signal(|| BinderState::Idle);

    use_context_provider({
        let binder = binder.clone();
        move || binder
    });
    use_context_provider(move || state);

    // Runs on mount and whenever the session signal changes.
    use_effect({
        let binder = binder.clone();
        move || {
            let snapshot = session.read().clone();
            binder.apply_session(&snapshot);
        }
    });

    use_future({
        let binder = binder.clone();
        move || {
            let binder = binder.clone();
            async move { binder.follow_transport().await }
        }
    });

    use_future({
        let binder = binder.clone();
        move || {
            let binder = binder.clone();
            let mut state = state;
            async move {
                let mut changes = binder.state_changes();
                loop {
                    let current = *changes.borrow_and_update();
                    state.set(current);
                    if changes.changed().await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    use_drop(move || binder.unmount());

    children
}

/// Channel adapters of the nearest [`RealtimeProvider`].
pub fn use_realtime() -> Channels {
    use_context::<SessionBinder>().channels()
}

/// Lifecycle state of the nearest [`RealtimeProvider`].
pub fn use_binder_state() -> Signal<BinderState> {
    use_context::<Signal<BinderState>>()
}
