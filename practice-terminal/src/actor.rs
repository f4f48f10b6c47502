//! TerminalActor - owns one [`TerminalSession`] and serialises everything that
//! touches it
//!
//! Keystrokes, control requests from the host, transport events and command
//! answers all arrive as [`TerminalMsg`]s in one mailbox, so output is appended
//! in the order the transport produced it and a restart's `kill` always
//! completes before the next `start`. Nothing in `handle` waits on the network
//! for longer than a send.

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::output_log::LogEvent;
use crate::session::{CommandCompletion, Key, TerminalSession, TerminalSnapshot};
use crate::transport::TransportEvent;

#[derive(Debug, Default)]
pub struct TerminalActor;

/// Arguments for spawning TerminalActor
pub struct TerminalArguments {
    pub session: TerminalSession,
    /// Receiving end of the channel the session's transport emits on
    pub transport_events: mpsc::UnboundedReceiver<TransportEvent>,
}

pub struct TerminalState {
    session: TerminalSession,
    forwarders: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
pub enum TerminalMsg {
    Key(Key),
    /// Run the editor's code, replacing any current run
    StartRun,
    StartShell,
    StopRun,
    ToggleLock,
    SetLock(bool),
    Clear,
    Resize {
        cols: u16,
        rows: u16,
    },
    /// Internal: event from the transport
    Transport(TransportEvent),
    /// Internal: answer to a dispatched shell command
    CommandFinished(CommandCompletion),
    Snapshot {
        reply: RpcReplyPort<TerminalSnapshot>,
    },
    SubscribeOutput {
        reply: RpcReplyPort<broadcast::Receiver<LogEvent>>,
    },
}

#[async_trait]
impl Actor for TerminalActor {
    type Msg = TerminalMsg;
    type State = TerminalState;
    type Arguments = TerminalArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let mut session = args.session;
        let mut forwarders = vec![forward(
            args.transport_events,
            myself.clone(),
            TerminalMsg::Transport,
        )];
        if let Some(completions) = session.take_command_completions() {
            forwarders.push(forward(completions, myself, TerminalMsg::CommandFinished));
        }

        Ok(TerminalState {
            session,
            forwarders,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let session = &mut state.session;
        match message {
            TerminalMsg::Key(key) => session.handle_key(key).await,
            TerminalMsg::StartRun => session.start_run().await,
            TerminalMsg::StartShell => session.start_shell().await,
            TerminalMsg::StopRun => session.stop_run().await,
            TerminalMsg::ToggleLock => session.toggle_lock(),
            TerminalMsg::SetLock(locked) => session.set_lock(locked),
            TerminalMsg::Clear => session.clear(),
            TerminalMsg::Resize { cols, rows } => session.resize(cols, rows).await,
            TerminalMsg::Transport(event) => session.handle_transport_event(event).await,
            TerminalMsg::CommandFinished(completion) => session.finish_command(completion),
            TerminalMsg::Snapshot { reply } => {
                let _ = reply.send(session.snapshot());
            }
            TerminalMsg::SubscribeOutput { reply } => {
                let _ = reply.send(session.subscribe_output());
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for forwarder in state.forwarders.drain(..) {
            forwarder.abort();
        }
        state.session.cancel_command();
        state.session.stop_run().await;
        Ok(())
    }
}

/// Cast everything arriving on `rx` into the actor's mailbox.
fn forward<T: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<T>,
    myself: ActorRef<TerminalMsg>,
    wrap: fn(T) -> TerminalMsg,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            if myself.cast(wrap(item)).is_err() {
                break;
            }
        }
    })
}
