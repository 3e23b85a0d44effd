//! Input debouncing for address-field driven lookups.

use std::time::Duration;

use opportunity_map_geocoder::GeocodeProvider;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{LocateOutcome, OpportunityLocator};

/// Input must be quiet this long before a lookup is issued.
pub const DEBOUNCE: Duration = Duration::from_millis(1000);

impl<P: GeocodeProvider + 'static> OpportunityLocator<P> {
    /// Locates descriptors from `inputs` once they stop changing.
    ///
    /// Each value restarts the [`DEBOUNCE`] window; only the value that
    /// survives a full window is located. The task ends when the sender
    /// is dropped, discarding any value still waiting out its window.
    #[must_use]
    pub fn spawn_debounced(&self, mut inputs: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
        let locator = self.clone();

        tokio::spawn(async move {
            let mut pending: Option<String> = None;

            loop {
                let Some(descriptor) = pending.take() else {
                    match inputs.recv().await {
                        Some(descriptor) => pending = Some(descriptor),
                        None => return,
                    }
                    continue;
                };

                tokio::select! {
                    next = inputs.recv() => match next {
                        Some(next) => pending = Some(next),
                        None => {
                            log::debug!("Input closed, dropping {descriptor:?}");
                            return;
                        }
                    },
                    () = tokio::time::sleep(DEBOUNCE) => {
                        let lookup = locator.locate(&descriptor);
                        tokio::spawn(async move {
                            match lookup.await {
                                Ok(LocateOutcome::NotFound) => {
                                    log::info!("Could not find location {descriptor:?}");
                                }
                                Ok(outcome) => log::debug!("Located {descriptor:?}: {outcome:?}"),
                                Err(e) => log::error!("Failed to locate {descriptor:?}: {e}"),
                            }
                        });
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use opportunity_map_geocoder::testing::candidate;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    use crate::fixtures::{MAIN_ST, ready_harness};

    #[tokio::test(start_paused = true)]
    async fn only_settled_input_is_located() {
        let harness = ready_harness().await;
        harness
            .provider
            .reply(MAIN_ST, vec![candidate(-71.06, 42.36, "address", 0.98)]);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = harness.locator.spawn_debounced(rx);

        tx.send("123 Main".to_string()).unwrap();
        sleep(Duration::from_millis(300)).await;
        tx.send("123 Main St, Bos".to_string()).unwrap();
        sleep(Duration::from_millis(300)).await;
        tx.send(MAIN_ST.to_string()).unwrap();

        sleep(Duration::from_millis(999)).await;
        assert_eq!(harness.provider.call_count(), 0);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.provider.call_count(), 1);
        assert_eq!(harness.provider.calls_for(MAIN_ST), 1);
        assert_eq!(harness.store.snapshot().opportunity_score, Some(6));

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn each_quiet_window_issues_one_lookup() {
        let harness = ready_harness().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = harness.locator.spawn_debounced(rx);

        tx.send("12 Elm St, Boston, MA".to_string()).unwrap();
        sleep(Duration::from_millis(1500)).await;
        tx.send(MAIN_ST.to_string()).unwrap();
        sleep(Duration::from_millis(1500)).await;

        assert_eq!(harness.provider.call_count(), 2);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closing_input_drops_pending_value() {
        let harness = ready_harness().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = harness.locator.spawn_debounced(rx);

        tx.send(MAIN_ST.to_string()).unwrap();
        sleep(Duration::from_millis(200)).await;
        drop(tx);
        task.await.unwrap();

        sleep(Duration::from_millis(2000)).await;
        assert_eq!(harness.provider.call_count(), 0);
    }
}
