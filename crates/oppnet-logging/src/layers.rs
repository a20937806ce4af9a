//! Custom tracing layers for oppnet runs

use tracing::{Subscriber, span};
use tracing_subscriber::{
    fmt::{
        self, MakeWriter,
        format::{Format, Json, JsonFields},
    },
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::config::JsonlConfig;
use crate::context::{RunContextData, RunContextGuard};

/// Layer that attaches the active run context to new spans
///
/// Spans opened while a [`RunContextGuard`] is alive carry a
/// [`RunContextExtension`] that later layers can read.
#[derive(Debug, Default)]
pub struct RunContextLayer;

impl RunContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct RunContextExtension {
    pub data: RunContextData,
}

impl<S> Layer<S> for RunContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        if let Some(run) = RunContextGuard::current() {
            span.extensions_mut().insert(RunContextExtension { data: run });
        }
    }
}

/// JSONL formatting layer writing to `writer`
pub fn jsonl_layer<S, W>(writer: W, config: &JsonlConfig) -> fmt::Layer<S, JsonFields, Format<Json>, W>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_writer(writer)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use tracing_subscriber::{Registry, layer::SubscriberExt};

    /// Records the scenario seen on each new span
    struct Probe(Arc<Mutex<Vec<Option<String>>>>);

    impl<S> Layer<S> for Probe
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    {
        fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
            let span = ctx.span(id).unwrap();
            let scenario = span
                .extensions()
                .get::<RunContextExtension>()
                .map(|ext| ext.data.scenario.clone());
            self.0.lock().unwrap().push(scenario);
        }
    }

    #[test]
    fn test_spans_carry_run_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscriber = Registry::default()
            .with(RunContextLayer::new())
            .with(Probe(seen.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let _outside = tracing::info_span!("outside");
            let _guard = RunContextGuard::new("relay");
            let _inside = tracing::info_span!("inside");
        });

        assert_eq!(*seen.lock().unwrap(), vec![None, Some("relay".to_string())]);
    }
}
