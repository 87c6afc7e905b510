use std::{collections::HashMap, sync::Mutex};

use serde_json::{json, Map, Value};
use tokio::{
    sync::oneshot::{self, Receiver, Sender},
    task::JoinHandle,
};
use tracing::{info, info_span, span::EnteredSpan};
use tracing_forest::{processor::from_fn, traits::*, tree::Tree, worker_task};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter, Layer, Registry};
use uuid::Uuid;

#[allow(dead_code)]
struct LogGlobal {
    handle: JoinHandle<()>,
}

lazy_static! {
    static ref SPAN_MAP: Mutex<HashMap<Uuid, Sender<Tree>>> = Mutex::new(HashMap::new());
    static ref LOG_GLOBAL: Mutex<Option<LogGlobal>> = Mutex::new(None);
}

/// A root span that, using tracing-forest, collects everything logged under it
/// so the whole tree can be retrieved once the span is done.  Work spawned
/// onto other tasks only shows up if it was `.instrument()`ed.
///
/// `init_logging()` must have been called for anything to be collected.
pub struct LoggedSpan {
    span: EnteredSpan,
    rx: Receiver<Tree>,
}

pub fn render_forest_to_value(tree: &Tree) -> Value {
    match tree {
        Tree::Span(span) => {
            json!({
                "name": span.name(),
                "nodes": span.nodes().iter().map(render_forest_to_value).collect::<Vec<Value>>(),
            })
        }
        Tree::Event(event) => {
            let mut obj = Map::new();
            if let Some(msg) = event.message() {
                obj.insert("message".to_string(), json!(msg));
            }
            for field in event.fields() {
                obj.insert(field.key().to_string(), json!(field.value()));
            }
            json!(obj)
        }
    }
}

impl LoggedSpan {
    pub fn new_logged_span(name: &str) -> LoggedSpan {
        let id = Uuid::new_v4();
        let span = info_span!(parent: None, "logged_span", name, uuid = %id).entered();
        info!("logged_span_start");
        let (tx, rx) = oneshot::channel();

        SPAN_MAP.lock().unwrap().insert(id, tx);

        LoggedSpan { span, rx }
    }

    /// Close the span and wait for its tree.  `None` if logging was never
    /// initialized.
    pub async fn retrieve(self) -> Option<Tree> {
        info!("logged_span_end");
        drop(self.span);
        self.rx.await.ok()
    }

    pub async fn retrieve_serde_json(self) -> Value {
        match self.retrieve().await {
            Some(tree) => render_forest_to_value(&tree),
            None => Value::Null,
        }
    }
}

/// Initialize logging.  `LoggedSpan` collection always captures
/// `hierarchies=trace`.  A non-empty `RUST_LOG` additionally enables compact
/// fmt output filtered by it; an empty one is treated as unset.
pub fn init_logging() {
    if LOG_GLOBAL.lock().unwrap().is_some() {
        return;
    }

    let mut layers = Vec::new();
    if let Ok(rustlog) = std::env::var("RUST_LOG") {
        if !rustlog.is_empty() {
            if let Ok(env_filter) = EnvFilter::try_from_default_env() {
                let layer = tracing_subscriber::fmt::layer()
                    .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
                    .compact()
                    .with_ansi(false)
                    .without_time()
                    .with_filter(env_filter)
                    .boxed();
                layers.push(layer);
            }
        }
    }

    let handle = tokio::spawn(
        worker_task()
            .set_global(true)
            .map_receiver(|_| {
                // Hand finished root spans to whoever is waiting on their
                // uuid; everything else is dropped.
                from_fn(|tree| {
                    if let Tree::Span(span) = &tree {
                        let id = span.uuid();
                        if let Some(tx) = SPAN_MAP.lock().unwrap().remove(&id) {
                            // The LoggedSpan may have been dropped unretrieved.
                            let _ = tx.send(tree);
                        }
                    }
                    Ok(())
                })
            })
            .build_with(|layer| {
                layers.push(layer.boxed());
                Registry::default()
                    .with(layers)
                    .with(EnvFilter::new("hierarchies=trace"))
            })
            .on(async {
                let _ = tokio::signal::ctrl_c().await;
            }),
    );

    *LOG_GLOBAL.lock().unwrap() = Some(LogGlobal { handle });
}
