//! Background worker driving the relay's deferred activations.
//!
//! Runs in a dedicated thread using `edge-executor` for cooperative
//! scheduling. One task per activation waits on its signal and runs the
//! routine; a run requested while the routine is executing is picked up on
//! the next iteration. Each run holds the activation's claim, so the worker
//! and [`Relay::run_pending`] never execute the same direction at once.
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────┐
//!  │  relay-work thread                                       │
//!  │  ┌────────────────────────────────────────────────────┐  │
//!  │  │  futures_lite::block_on(executor.run(stop))        │  │
//!  │  │  ┌────────────────┐ ┌─────────┐ ┌─────────┐        │  │
//!  │  │  │ SdioRxDispatch │ │  SmdRx  │ │  SmdTx  │        │  │
//!  │  │  └────────────────┘ └─────────┘ └─────────┘        │  │
//!  │  └────────────────────────────────────────────────────┘  │
//!  └──────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{info, warn};

use crate::ports::{BulkTransport, EventSink, SdioMux, SmdChannel};
use crate::relay::{Activation, Relay};

type StopSignal = Signal<CriticalSectionRawMutex, ()>;

/// Handle to a running worker thread.
pub struct Worker {
    stop: Arc<StopSignal>,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Stop the executor and join the thread.
    pub fn shutdown(self) {
        self.stop.signal(());
        if self.thread.join().is_err() {
            warn!("worker: thread panicked");
        }
    }
}

/// Spawn the worker thread for `relay`.
pub fn spawn<T, S, M, E>(relay: Arc<Relay<T, S, M, E>>) -> std::io::Result<Worker>
where
    T: BulkTransport + Send + Sync + 'static,
    S: SdioMux + Send + Sync + 'static,
    M: SmdChannel + Send + Sync + 'static,
    E: EventSink + Send + Sync + 'static,
{
    let stop = Arc::new(StopSignal::new());
    let thread_stop = stop.clone();
    let thread = std::thread::Builder::new()
        .name("relay-work".into())
        .spawn(move || run(&relay, &thread_stop))?;
    Ok(Worker { stop, thread })
}

fn run<T, S, M, E>(relay: &Arc<Relay<T, S, M, E>>, stop: &StopSignal)
where
    T: BulkTransport,
    S: SdioMux,
    M: SmdChannel,
    E: EventSink,
{
    let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();

    for activation in Activation::ALL {
        executor
            .spawn(activation_loop(relay.clone(), activation))
            .detach();
    }

    info!("worker: started ({} activations)", Activation::ALL.len());
    futures_lite::future::block_on(executor.run(stop.wait()));
    info!("worker: stopped");
}

async fn activation_loop<T, S, M, E>(relay: Arc<Relay<T, S, M, E>>, activation: Activation)
where
    T: BulkTransport,
    S: SdioMux,
    M: SmdChannel,
    E: EventSink,
{
    loop {
        relay.activations().wait(activation).await;
        // Deferred to `run_pending` when it holds the claim.
        relay.run_activation(activation);
    }
}
