use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use futures_core::stream::BoxStream;
use ustr::Ustr;

use super::source_interface::{
    ClassHierarchyInspector, EcSqlQueryDef, QueryReaderOptions, Row, RowSource, RowsLimit,
};
use crate::error::{ErrorLayer, HierarchyError, Result};

#[derive(Clone)]
enum ScriptedResponse {
    Rows(Vec<Row>),
    Error(HierarchyError),
}

struct ScriptedQuery {
    needle: String,
    response: ScriptedResponse,
}

/// A row source that answers queries from scripted responses.
///
/// Responses are registered against a "needle"; a query is answered by the
/// response whose needle equals its ECSQL, or failing that by the longest
/// needle contained in it.  Wrapping queries (like filtering does) therefore
/// still find the response of the query they wrap.  Queries nothing was
/// scripted for produce no rows.
#[derive(Default)]
pub struct StaticRowSource {
    scripts: Mutex<Vec<ScriptedQuery>>,
    executed: Mutex<Vec<(EcSqlQueryDef, QueryReaderOptions)>>,
    delay: Option<Duration>,
}

impl StaticRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, needle: &str, rows: Vec<Row>) -> Self {
        self.set_response(needle, ScriptedResponse::Rows(rows));
        self
    }

    pub fn with_error(self, needle: &str, err: HierarchyError) -> Self {
        self.set_response(needle, ScriptedResponse::Error(err));
        self
    }

    /// Make every query wait before producing its reader.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the rows a needle answers with, like a data source change
    /// would.
    pub fn set_rows(&self, needle: &str, rows: Vec<Row>) {
        self.set_response(needle, ScriptedResponse::Rows(rows));
    }

    fn set_response(&self, needle: &str, response: ScriptedResponse) {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.iter_mut().find(|s| s.needle == needle) {
            Some(existing) => existing.response = response,
            None => scripts.push(ScriptedQuery {
                needle: needle.to_string(),
                response,
            }),
        }
    }

    fn find_response(&self, ecsql: &str) -> Option<ScriptedResponse> {
        let scripts = self.scripts.lock().unwrap();
        scripts
            .iter()
            .find(|s| s.needle == ecsql)
            .or_else(|| {
                scripts
                    .iter()
                    .filter(|s| ecsql.contains(s.needle.as_str()))
                    .max_by_key(|s| s.needle.len())
            })
            .map(|s| s.response.clone())
    }

    /// Every query executed so far, in execution order.
    pub fn executed_queries(&self) -> Vec<(EcSqlQueryDef, QueryReaderOptions)> {
        self.executed.lock().unwrap().clone()
    }

    /// How many executed queries contain `needle`.
    pub fn query_count(&self, needle: &str) -> usize {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|(q, _)| q.ecsql.contains(needle))
            .count()
    }

    pub fn total_queries(&self) -> usize {
        self.executed.lock().unwrap().len()
    }
}

#[async_trait]
impl RowSource for StaticRowSource {
    async fn create_query_reader(
        &self,
        query: &EcSqlQueryDef,
        options: QueryReaderOptions,
    ) -> Result<BoxStream<'static, Result<Row>>> {
        trace!(ecsql = %query.ecsql, limit = ?options.limit, "static_row_source_query");
        self.executed
            .lock()
            .unwrap()
            .push((query.clone(), options.clone()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut rows = match self.find_response(&query.ecsql) {
            Some(ScriptedResponse::Rows(rows)) => rows,
            Some(ScriptedResponse::Error(err)) => return Err(err),
            None => vec![],
        };

        let mut items: Vec<Result<Row>> = vec![];
        if let Some(RowsLimit::Limit(limit)) = options.limit {
            if rows.len() > limit as usize {
                rows.truncate(limit as usize);
                items.extend(rows.into_iter().map(Ok));
                items.push(Err(HierarchyError::RowsLimitExceeded { limit }));
                return Ok(futures::stream::iter(items).boxed());
            }
        }
        items.extend(rows.into_iter().map(Ok));
        Ok(futures::stream::iter(items).boxed())
    }
}

struct ClassInfo {
    label: String,
    bases: Vec<Ustr>,
}

/// A class hierarchy described up front.  Classes that were never registered
/// only derive from themselves and are labeled with their own name.
pub struct StaticClassHierarchy {
    imodel_key: String,
    classes: HashMap<Ustr, ClassInfo>,
}

impl StaticClassHierarchy {
    pub fn new(imodel_key: &str) -> Self {
        StaticClassHierarchy {
            imodel_key: imodel_key.to_string(),
            classes: HashMap::new(),
        }
    }

    /// Register `full_class_name` with its direct base classes.
    pub fn with_class(mut self, full_class_name: &str, label: &str, bases: &[&str]) -> Self {
        self.classes.insert(
            Ustr::from(full_class_name),
            ClassInfo {
                label: label.to_string(),
                bases: bases.iter().map(|b| Ustr::from(*b)).collect(),
            },
        );
        self
    }
}

#[async_trait]
impl ClassHierarchyInspector for StaticClassHierarchy {
    async fn class_derives_from(&self, derived: &str, base: &str) -> Result<bool> {
        let base = Ustr::from(base);
        let mut pending = vec![Ustr::from(derived)];
        let mut seen = HashSet::new();
        while let Some(class_name) = pending.pop() {
            if class_name == base {
                return Ok(true);
            }
            if !seen.insert(class_name) {
                continue;
            }
            if let Some(info) = self.classes.get(&class_name) {
                pending.extend(info.bases.iter().cloned());
            }
        }
        Ok(false)
    }

    async fn class_label(&self, full_class_name: &str) -> Result<String> {
        if full_class_name.is_empty() {
            return Err(HierarchyError::sticky(
                ErrorLayer::BadInput,
                "Empty class name",
            ));
        }
        Ok(match self.classes.get(&Ustr::from(full_class_name)) {
            Some(info) => info.label.clone(),
            None => full_class_name.to_string(),
        })
    }

    fn imodel_key(&self) -> &str {
        &self.imodel_key
    }
}
