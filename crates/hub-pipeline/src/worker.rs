//! One tokio task per component, wired together with bounded mpsc channels
//! (spec §4.1, §5). Every suspension point — channel send, channel recv,
//! adapter poll — is raced against the project's [`Cancellation`] so a stop
//! request unblocks a worker that would otherwise wait forever on a full or
//! empty queue.

use std::sync::Arc;

use hub_core::component::{Counter, InputComponent, OutputComponent, RulesetComponent};
use hub_core::context::Cancellation;
use hub_core::envelope::Envelope;
use hub_core::error::{ErrorContext, HubError, Result};
use hub_core::ids::{ComponentId, ProjectId, ProjectNodeSequence};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bound on every inter-component edge. Sized to absorb a short producer
/// burst without letting an unbounded queue hide a stuck downstream
/// component (spec §5's backpressure requirement).
pub const EDGE_CAPACITY: usize = 1024;

fn err_context(project_id: &ProjectId, pns: &ProjectNodeSequence, component_id: &ComponentId) -> ErrorContext {
    ErrorContext::new()
        .with_project(project_id.clone())
        .with_pns(pns.clone())
        .with_component(component_id.clone())
}

/// Drives one input adapter: polls for envelopes and fans each one out to
/// every downstream edge. A full downstream queue applies backpressure by
/// blocking this worker's send, which in turn blocks the next `poll` —
/// exactly the propagation spec §5 asks for.
///
/// `input` must already be open — `Project::start` opens every adapter
/// before spawning its worker so an open failure can still produce the
/// all-or-nothing teardown spec §4.1 requires; this function only drives
/// the poll loop and closes the adapter again when it exits.
pub async fn run_input(
    project_id: ProjectId,
    pns: ProjectNodeSequence,
    component_id: ComponentId,
    cancel: Cancellation,
    mut input: Box<dyn InputComponent>,
    counter: Arc<Counter>,
    downstream: Vec<mpsc::Sender<Envelope>>,
) -> Result<()> {
    let ctx = err_context(&project_id, &pns, &component_id);
    let outcome = run_input_loop(&cancel, input.as_mut(), &counter, &downstream).await;

    if let Err(e) = input.close().await {
        warn!(component = %component_id, error = %e, "input adapter close failed");
    }
    outcome.map_err(|e| e.with_context(ctx))
}

async fn run_input_loop(
    cancel: &Cancellation,
    input: &mut dyn InputComponent,
    counter: &Counter,
    downstream: &[mpsc::Sender<Envelope>],
) -> Result<()> {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            polled = input.poll() => polled?,
        };

        let Some(envelope) = envelope else {
            continue;
        };
        counter.increment();

        let fanned = envelope.fan_out(downstream.len().max(1));
        for (edge, copy) in downstream.iter().zip(fanned.into_iter()) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                send_result = edge.send(copy) => {
                    if send_result.is_err() {
                        return Err(HubError::component_failure("downstream edge closed"));
                    }
                }
            }
        }
    }
}

/// Drives one ruleset: receives an envelope, evaluates it, and fans every
/// produced output envelope to every downstream edge.
pub async fn run_ruleset(
    project_id: ProjectId,
    pns: ProjectNodeSequence,
    component_id: ComponentId,
    cancel: Cancellation,
    ruleset: Box<dyn RulesetComponent>,
    counter: Arc<Counter>,
    mut upstream: mpsc::Receiver<Envelope>,
    downstream: Vec<mpsc::Sender<Envelope>>,
) -> Result<()> {
    let ctx = err_context(&project_id, &pns, &component_id);
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            received = upstream.recv() => received,
        };
        let Some(envelope) = envelope else {
            return Ok(());
        };

        let produced = ruleset
            .evaluate(&envelope)
            .await
            .map_err(|e| e.with_context(ctx.clone()))?;
        for out in produced {
            counter.increment();
            let fanned = out.fan_out(downstream.len().max(1));
            for (edge, copy) in downstream.iter().zip(fanned.into_iter()) {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    send_result = edge.send(copy) => {
                        if send_result.is_err() {
                            return Err(HubError::component_failure("downstream edge closed").with_context(ctx.clone()));
                        }
                    }
                }
            }
        }
    }
}

/// Drives one output adapter: receives envelopes and delivers them one at a
/// time, draining whatever is already queued on cancellation rather than
/// dropping it silently (best-effort, not guaranteed — a `Stop` with a short
/// timeout can still truncate this drain).
///
/// `output` must already be open, for the same reason `run_input` requires
/// it — see that function's doc comment.
pub async fn run_output(
    project_id: ProjectId,
    pns: ProjectNodeSequence,
    component_id: ComponentId,
    cancel: Cancellation,
    mut output: Box<dyn OutputComponent>,
    counter: Arc<Counter>,
    mut upstream: mpsc::Receiver<Envelope>,
) -> Result<()> {
    let ctx = err_context(&project_id, &pns, &component_id);
    let outcome = run_output_loop(&cancel, output.as_mut(), &counter, &mut upstream).await;

    while let Ok(envelope) = upstream.try_recv() {
        if let Err(e) = output.send(envelope).await {
            warn!(component = %component_id, error = %e, "dropping envelope during shutdown drain");
            break;
        }
    }

    if let Err(e) = output.close().await {
        warn!(component = %component_id, error = %e, "output adapter close failed");
    }
    outcome.map_err(|e| e.with_context(ctx))
}

async fn run_output_loop(
    cancel: &Cancellation,
    output: &mut dyn OutputComponent,
    counter: &Counter,
    upstream: &mut mpsc::Receiver<Envelope>,
) -> Result<()> {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            received = upstream.recv() => received,
        };
        let Some(envelope) = envelope else {
            return Ok(());
        };
        output.send(envelope).await?;
        counter.increment();
        debug!("envelope delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::envelope::Value;

    fn envelope_with(seq: i32) -> Envelope {
        let mut env = Envelope::new();
        env.insert("seq", Value::Number(seq as f64));
        env
    }

    struct OneShotInput {
        remaining: Vec<Envelope>,
    }

    #[async_trait::async_trait]
    impl InputComponent for OneShotInput {
        async fn open(&mut self) -> Result<()> {
            Ok(())
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
        async fn poll(&mut self) -> Result<Option<Envelope>> {
            if self.remaining.is_empty() {
                std::future::pending::<()>().await;
            }
            Ok(Some(self.remaining.remove(0)))
        }
    }

    #[tokio::test]
    async fn input_worker_fans_out_to_every_downstream_edge() {
        let cancel = Cancellation::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let input = Box::new(OneShotInput {
            remaining: vec![envelope_with(1)],
        });
        let counter = Arc::new(Counter::new());

        let cancel_clone = cancel.clone();
        let counter_clone = counter.clone();
        let handle = tokio::spawn(async move {
            run_input(
                ProjectId::new("p1"),
                ProjectNodeSequence::new("INPUT.i1"),
                ComponentId::new("i1"),
                cancel_clone,
                input,
                counter_clone,
                vec![tx1, tx2],
            )
            .await
        });

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(counter.total(), 1);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn ruleset_worker_applies_fan_out_from_evaluate() {
        let cancel = Cancellation::new();
        let (up_tx, up_rx) = mpsc::channel(8);
        let (down_tx, mut down_rx) = mpsc::channel(8);
        let counter = Arc::new(Counter::new());

        struct Doubling;
        #[async_trait::async_trait]
        impl RulesetComponent for Doubling {
            async fn evaluate(&self, input: &Envelope) -> Result<Vec<Envelope>> {
                Ok(input.fan_out(2))
            }
        }

        let cancel_clone = cancel.clone();
        let counter_clone = counter.clone();
        let handle = tokio::spawn(async move {
            run_ruleset(
                ProjectId::new("p1"),
                ProjectNodeSequence::new("RULESET.r1"),
                ComponentId::new("r1"),
                cancel_clone,
                Box::new(Doubling),
                counter_clone,
                up_rx,
                vec![down_tx],
            )
            .await
        });

        up_tx.send(envelope_with(7)).await.unwrap();
        let first = down_rx.recv().await.unwrap();
        let second = down_rx.recv().await.unwrap();
        assert_eq!(first, envelope_with(7));
        assert_eq!(second, envelope_with(7));
        assert_eq!(counter.total(), 2);

        drop(up_tx);
        handle.await.unwrap().unwrap();
        cancel.cancel();
    }
}
