use super::*;

#[uniffi::export]
impl ToleranceCore {
    /// Join a room with an invitation code, blocking until the saga ends.
    pub fn join_room(
        &self,
        code: String,
        display_name: String,
    ) -> Result<FfiJoinResult, ToleranceError> {
        let services = self.services()?;
        let outcome = get_tokio_runtime()?.block_on(async {
            let outcome = services.saga.join(&code, &display_name).await?;
            services
                .load_room_reminders(&outcome.user_id, &outcome.room_id)
                .await;
            Ok::<_, JoinError>(outcome)
        })?;
        Ok(outcome.into())
    }

    /// Start a join in the background and report to `listener`.
    ///
    /// The room's reminder settings are loaded before success is reported.
    /// The listener stays attached until the join ends, another join is
    /// started, or `detach_join_listener` is called. A detached listener hears
    /// nothing more, but the join itself still runs to completion.
    pub fn join_room_async(
        &self,
        code: String,
        display_name: String,
        listener: Box<dyn JoinListener>,
    ) -> Result<(), ToleranceError> {
        let services = self.services()?;
        let runtime = get_tokio_runtime()?;
        let listener: Arc<dyn JoinListener> = Arc::from(listener);

        let complete = listener.clone();
        let sink = ResultSink::new(move |result: Result<JoinOutcome, JoinError>| {
            complete.on_complete(result.into());
        });
        if let Some(previous) = self.join_sink.lock().replace(sink.clone()) {
            previous.detach();
        }

        let progress = sink.clone();
        runtime.spawn(async move {
            let on_stage = move |stage| {
                if progress.is_attached() {
                    listener.on_stage(stage);
                }
            };
            let result = services
                .saga
                .join_with_progress(&code, &display_name, on_stage)
                .await;
            if let Ok(outcome) = &result {
                services
                    .load_room_reminders(&outcome.user_id, &outcome.room_id)
                    .await;
            }
            if !sink.deliver(result) {
                tracing::debug!(%code, "join finished after its listener detached");
            }
        });
        Ok(())
    }

    /// Call when the join screen goes away.
    pub fn detach_join_listener(&self) {
        if let Some(sink) = self.join_sink.lock().take() {
            sink.detach();
        }
    }

    pub fn is_join_in_flight(&self, code: String) -> Result<bool, ToleranceError> {
        Ok(self.services()?.saga.is_in_flight(&code))
    }
}
