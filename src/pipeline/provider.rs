//! The hierarchy provider: resolves hierarchy levels for parents on request.
//!
//! Levels are loaded through the (possibly filtering-decorated) definition,
//! hidden nodes are spliced out and the raw result is cached.  Everything
//! that depends on the formatter (labels, grouping) happens on every read, on
//! top of the cached raw nodes.
//!
//! Each request takes a snapshot of the definition adapter, formatter and
//! cancellation token that are active when it is made.  Changing any of them
//! cancels the token, so requests made under an older configuration end
//! without producing anything and never write into the caches.

use std::sync::{Arc, Mutex};

use async_stream::stream;
use futures::{
    future::{self, BoxFuture, FutureExt, Shared},
    stream::BoxStream,
    StreamExt,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::{
    cache::{HierarchyCache, RequestKey},
    definition::{DefinitionAdapter, HierarchyDefinition, HierarchyLevelDefinition},
    events::{DataChangedEvent, HierarchyChange},
    filtering::{FilteringHierarchyDefinition, HierarchyFilter},
    formatter::{format_label, DefaultValueFormatter, ValueFormatter},
    grouping::{find_grouping_node, group_level, GroupingContext, GroupingKind},
};
use crate::{
    abstract_source::{ClassHierarchyInspector, QueryReaderOptions, RowSource, RowsLimit},
    config::HierarchyProviderConfig,
    error::{ErrorLayer, HierarchyError, Result},
    hierarchy::{
        HierarchyNode, HierarchyNodeKey, InstanceKey, ParentNode, ProcessedChildren,
        ProcessedNode, SourceNode,
    },
};

type LevelResult = Result<Arc<Vec<SourceNode>>>;
type PendingLevel = Shared<BoxFuture<'static, LevelResult>>;

const CHANGES_CAPACITY: usize = 16;

pub struct HierarchyProviderProps {
    pub definition: Arc<dyn HierarchyDefinition>,
    pub row_source: Arc<dyn RowSource>,
    pub inspector: Arc<dyn ClassHierarchyInspector>,
    /// `None` uses `DefaultValueFormatter`.
    pub formatter: Option<Arc<dyn ValueFormatter>>,
    pub filter: Option<HierarchyFilter>,
    /// The provider subscribes to this for as long as it's alive.
    pub data_changed: Option<Arc<DataChangedEvent>>,
    pub config: HierarchyProviderConfig,
}

impl HierarchyProviderProps {
    pub fn new(
        definition: Arc<dyn HierarchyDefinition>,
        row_source: Arc<dyn RowSource>,
        inspector: Arc<dyn ClassHierarchyInspector>,
    ) -> Self {
        HierarchyProviderProps {
            definition,
            row_source,
            inspector,
            formatter: None,
            filter: None,
            data_changed: None,
            config: HierarchyProviderConfig::default(),
        }
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn ValueFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn with_filter(mut self, filter: HierarchyFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_data_changed(mut self, event: Arc<DataChangedEvent>) -> Self {
        self.data_changed = Some(event);
        self
    }

    pub fn with_config(mut self, config: HierarchyProviderConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct GetHierarchyNodesProps {
    /// `None` requests the root level.
    pub parent_node: Option<HierarchyNode>,
    pub instance_filter: Option<Value>,
    /// `None` leaves the limit up to the row source.
    pub hierarchy_level_size_limit: Option<RowsLimit>,
    pub ignore_cache: bool,
}

impl GetHierarchyNodesProps {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn children_of(parent: &HierarchyNode) -> Self {
        GetHierarchyNodesProps {
            parent_node: Some(parent.clone()),
            ..Default::default()
        }
    }

    pub fn with_instance_filter(mut self, instance_filter: Value) -> Self {
        self.instance_filter = Some(instance_filter);
        self
    }

    pub fn with_size_limit(mut self, limit: RowsLimit) -> Self {
        self.hierarchy_level_size_limit = Some(limit);
        self
    }

    pub fn ignoring_cache(mut self) -> Self {
        self.ignore_cache = true;
        self
    }
}

/// The parts of a level request that vary for the same parent.
#[derive(Clone, Debug, Default, PartialEq)]
struct LevelVariant {
    instance_filter: Option<Value>,
    limit: Option<RowsLimit>,
}

impl LevelVariant {
    fn fingerprint(&self) -> Option<String> {
        if self.instance_filter.is_none() && self.limit.is_none() {
            return None;
        }
        let filter = self
            .instance_filter
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_default();
        let limit = self.limit.map(|l| l.fingerprint()).unwrap_or_default();
        Some(format!("{}|{}", filter, limit))
    }
}

fn request_key(parent: Option<&ParentNode>, variant: &LevelVariant) -> RequestKey {
    RequestKey::new(
        parent.map(|p| p.identity()).unwrap_or_default(),
        variant.fingerprint(),
    )
}

fn finalize(node: ProcessedNode) -> HierarchyNode {
    let children = match &node.children {
        ProcessedChildren::Known(children) => *children,
        ProcessedChildren::Grouped(children) => !children.is_empty(),
        ProcessedChildren::Unknown => false,
    };
    node.into_hierarchy_node(children)
}

fn default_formatter() -> Arc<dyn ValueFormatter> {
    Arc::new(DefaultValueFormatter)
}

/// The class hidden instance nodes are merged by.
fn hidden_merge_class(node: &SourceNode) -> Option<ustr::Ustr> {
    node.instance_keys().first().map(|k| k.class_name)
}

struct ProviderState {
    adapter: DefinitionAdapter,
    formatter: Arc<dyn ValueFormatter>,
    filter: Option<HierarchyFilter>,
    token: CancellationToken,
    levels: HierarchyCache<PendingLevel>,
    children: HierarchyCache<bool>,
}

struct ProviderShared {
    source_definition: Arc<dyn HierarchyDefinition>,
    row_source: Arc<dyn RowSource>,
    inspector: Arc<dyn ClassHierarchyInspector>,
    grouping_order: Vec<GroupingKind>,
    state: Mutex<ProviderState>,
    changes: broadcast::Sender<HierarchyChange>,
}

impl ProviderShared {
    fn build_adapter(&self, filter: Option<&HierarchyFilter>) -> DefinitionAdapter {
        build_adapter(&self.source_definition, &self.inspector, filter)
    }

    /// Cancel everything in flight, optionally drop the caches, and tell
    /// subscribers about `change`.  `update` runs under the same lock so no
    /// request can observe a half-applied change.
    fn invalidate<F>(&self, change: HierarchyChange, clear_caches: bool, update: F)
    where
        F: FnOnce(&mut ProviderState),
    {
        {
            let mut state = self.state.lock().unwrap();
            update(&mut *state);
            state.token.cancel();
            state.token = CancellationToken::new();
            if clear_caches {
                state.levels.clear();
                state.children.clear();
            } else {
                // Levels still loading belong to the cancelled token.
                state
                    .levels
                    .retain(|pending| matches!(pending.peek(), Some(Ok(_))));
            }
        }
        trace!(change = ?change, clear_caches, "hierarchy_invalidated");
        // Nobody listening is fine.
        let _ = self.changes.send(change);
    }
}

fn build_adapter(
    source: &Arc<dyn HierarchyDefinition>,
    inspector: &Arc<dyn ClassHierarchyInspector>,
    filter: Option<&HierarchyFilter>,
) -> DefinitionAdapter {
    let definition: Arc<dyn HierarchyDefinition> = match filter {
        Some(filter) => Arc::new(FilteringHierarchyDefinition::new(
            source.clone(),
            inspector.clone(),
            filter.clone(),
        )),
        None => source.clone(),
    };
    DefinitionAdapter::new(definition, inspector.imodel_key())
}

/// Everything a single request works with.
#[derive(Clone)]
struct LevelLoader {
    shared: Arc<ProviderShared>,
    adapter: DefinitionAdapter,
    formatter: Arc<dyn ValueFormatter>,
    token: CancellationToken,
    ignore_cache: bool,
}

impl LevelLoader {
    /// The raw, hidden-spliced nodes of a level, through the level cache.
    fn source_level(
        &self,
        parent: Option<ParentNode>,
        variant: LevelVariant,
    ) -> BoxFuture<'static, LevelResult> {
        let this = self.clone();
        async move {
            let key = request_key(parent.as_ref(), &variant);
            let cached = if this.ignore_cache {
                None
            } else {
                let mut state = this.shared.state.lock().unwrap();
                match state.levels.get(&key) {
                    // A failed level is retried rather than served again.
                    Some(pending) if matches!(pending.peek(), Some(Err(_))) => {
                        trace!(parent = %key.primary, "level_cache_evict_failed");
                        state.levels.remove(&key);
                        None
                    }
                    cached => cached,
                }
            };
            let pending = match cached {
                Some(pending) => {
                    trace!(parent = %key.primary, "level_cache_hit");
                    pending
                }
                None => {
                    trace!(parent = %key.primary, "level_cache_miss");
                    let pending = this
                        .clone()
                        .compute_level(parent.clone(), variant.clone())
                        .boxed()
                        .shared();
                    let mut state = this.shared.state.lock().unwrap();
                    if !this.token.is_cancelled() {
                        state.levels.set(key.clone(), pending.clone());
                    }
                    pending
                }
            };
            match pending.await {
                // The level was started under an older configuration.
                Err(err) if err.is_cancelled() && !this.token.is_cancelled() => {
                    trace!(parent = %key.primary, "level_recompute");
                    this.compute_level(parent, variant).await
                }
                result => result,
            }
        }
        .boxed()
    }

    async fn compute_level(self, parent: Option<ParentNode>, variant: LevelVariant) -> LevelResult {
        let parent = parent.as_ref();
        let defs = self
            .adapter
            .define_level(parent, variant.instance_filter.as_ref())
            .await?;

        let mut nodes = vec![];
        for def in defs {
            match def {
                HierarchyLevelDefinition::GenericNode(node) => {
                    nodes.push(self.adapter.normalize(node, parent));
                }
                HierarchyLevelDefinition::InstanceNodesQuery {
                    full_class_name,
                    query,
                } => {
                    trace!(class = %full_class_name, ecsql = %query.ecsql, "level_query");
                    let options = QueryReaderOptions {
                        limit: variant.limit,
                        ..Default::default()
                    };
                    let mut rows = self
                        .shared
                        .row_source
                        .create_query_reader(&query, options)
                        .await?;
                    while let Some(row) = rows.next().await {
                        if self.token.is_cancelled() {
                            return Err(HierarchyError::Cancelled);
                        }
                        let row = row?;
                        nodes.push(self.adapter.parse_node(&row, parent).await?);
                    }
                }
            }
        }

        let mut kept = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Some(node) = self.adapter.pre_process(node).await? {
                kept.push(node);
            }
        }
        Ok(Arc::new(self.splice_hidden(kept, &variant).await?))
    }

    /// Replace hidden nodes with their children.  Hidden instance nodes of the
    /// same class are merged first so their children come from one level
    /// request, spliced where the first of them was.
    async fn splice_hidden(
        &self,
        nodes: Vec<SourceNode>,
        variant: &LevelVariant,
    ) -> Result<Vec<SourceNode>> {
        enum Slot {
            Visible(SourceNode),
            Hidden(usize),
        }

        let mut slots = Vec::with_capacity(nodes.len());
        let mut hidden: Vec<SourceNode> = vec![];
        for node in nodes {
            if !node.processing.hide_in_hierarchy() {
                slots.push(Slot::Visible(node));
                continue;
            }
            if node.children == Some(false) {
                continue;
            }
            let merge_target = hidden_merge_class(&node).and_then(|class_name| {
                hidden
                    .iter()
                    .position(|h| hidden_merge_class(h) == Some(class_name))
            });
            match merge_target {
                Some(idx) => {
                    if let (
                        HierarchyNodeKey::Instances { instance_keys },
                        HierarchyNodeKey::Instances {
                            instance_keys: merged,
                        },
                    ) = (&mut hidden[idx].key, node.key)
                    {
                        for key in merged {
                            if !instance_keys.contains(&key) {
                                instance_keys.push(key);
                            }
                        }
                    }
                }
                None => {
                    slots.push(Slot::Hidden(hidden.len()));
                    hidden.push(node);
                }
            }
        }

        let mut result = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Visible(node) => result.push(node),
                Slot::Hidden(idx) => {
                    trace!(key = ?hidden[idx].key, "splice_hidden_node");
                    let children = self
                        .source_level(Some(hidden[idx].as_parent()), variant.clone())
                        .await?;
                    result.extend(children.iter().cloned());
                }
            }
        }
        Ok(result)
    }

    /// Whether the level under `parent` ends up with any nodes, through the
    /// children cache.  A completed level in the level cache answers without
    /// querying; otherwise the level is probed until the first visible node.
    fn level_has_nodes(&self, parent: ParentNode) -> BoxFuture<'static, Result<bool>> {
        let this = self.clone();
        async move {
            let key = request_key(Some(&parent), &LevelVariant::default());
            let (known, completed) = if this.ignore_cache {
                (None, None)
            } else {
                let mut state = this.shared.state.lock().unwrap();
                let known = state.children.get(&key);
                let completed = state.levels.get(&key).and_then(|pending| match pending.peek() {
                    Some(Ok(nodes)) => Some(nodes.clone()),
                    _ => None,
                });
                (known, completed)
            };
            if let Some(known) = known {
                trace!(parent = %key.primary, known, "children_cache_hit");
                return Ok(known);
            }

            let probed = match completed {
                Some(nodes) => this.any_node_shown(&nodes).await,
                None => this.probe_level(&parent).await,
            };
            let has_nodes = match probed {
                Ok(has_nodes) => has_nodes,
                Err(err) if err.is_rows_limit_exceeded() => true,
                Err(err) => return Err(err),
            };

            let mut state = this.shared.state.lock().unwrap();
            if !this.token.is_cancelled() {
                state.children.set(key, has_nodes);
            }
            Ok(has_nodes)
        }
        .boxed()
    }

    /// Whether `node` makes its level non-empty.  Hidden nodes and nodes
    /// hidden when childless only do if they have children.
    async fn node_shown(&self, node: &SourceNode) -> Result<bool> {
        if !node.processing.hide_in_hierarchy() && !node.processing.hide_if_no_children() {
            return Ok(true);
        }
        match node.children {
            Some(children) => Ok(children),
            None => self.level_has_nodes(node.as_parent()).await,
        }
    }

    async fn any_node_shown(&self, nodes: &[SourceNode]) -> Result<bool> {
        for node in nodes {
            if self.node_shown(node).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn probe_level(&self, parent: &ParentNode) -> Result<bool> {
        trace!(parent = ?parent.key, "probe_level");
        let defs = self.adapter.define_level(Some(parent), None).await?;
        for def in defs {
            match def {
                HierarchyLevelDefinition::GenericNode(node) => {
                    let node = self.adapter.normalize(node, Some(parent));
                    if let Some(node) = self.adapter.pre_process(node).await? {
                        if self.node_shown(&node).await? {
                            return Ok(true);
                        }
                    }
                }
                HierarchyLevelDefinition::InstanceNodesQuery { query, .. } => {
                    let mut rows = self
                        .shared
                        .row_source
                        .create_query_reader(&query, QueryReaderOptions::default())
                        .await?;
                    while let Some(row) = rows.next().await {
                        let row = row?;
                        let node = self.adapter.parse_node(&row, Some(parent)).await?;
                        if let Some(node) = self.adapter.pre_process(node).await? {
                            if self.node_shown(&node).await? {
                                return Ok(true);
                            }
                        }
                    }
                }
            }
        }
        Ok(false)
    }

    /// Format, determine children, group and post-process a level.
    async fn read_level(
        &self,
        parent: Option<&ParentNode>,
        variant: &LevelVariant,
    ) -> Result<Vec<ProcessedNode>> {
        let source = self.source_level(parent.cloned(), variant.clone()).await?;

        let mut nodes = Vec::with_capacity(source.len());
        for node in source.iter() {
            let label = format_label(&node.label, &*self.formatter).await?;
            let mut node = ProcessedNode::from_source(node.clone(), label);
            if node.children == ProcessedChildren::Unknown {
                let has_children = self.level_has_nodes(node.as_parent()).await?;
                node.children = ProcessedChildren::Known(has_children);
            }
            if node.processing.hide_if_no_children()
                && node.children == ProcessedChildren::Known(false)
            {
                continue;
            }
            nodes.push(node);
        }

        let ctx = GroupingContext {
            inspector: &*self.shared.inspector,
            formatter: &*self.formatter,
            order: &self.shared.grouping_order,
            parent,
        };
        let grouped = group_level(&ctx, nodes).await?;
        self.post_process_all(grouped).await
    }

    /// Run the post-processing hook over a level, grouped nodes before the
    /// grouping node holding them.
    fn post_process_all<'a>(
        &'a self,
        nodes: Vec<ProcessedNode>,
    ) -> BoxFuture<'a, Result<Vec<ProcessedNode>>> {
        async move {
            let mut result = Vec::with_capacity(nodes.len());
            for mut node in nodes {
                node.children = match node.children {
                    ProcessedChildren::Grouped(children) => {
                        ProcessedChildren::Grouped(self.post_process_all(children).await?)
                    }
                    other => other,
                };
                if node.is_grouping() && node.grouped_children().is_empty() {
                    continue;
                }
                if let Some(node) = self.adapter.post_process(node).await? {
                    result.push(node);
                }
            }
            Ok(result)
        }
        .boxed()
    }

    /// The children of a grouping node come from regrouping the level it was
    /// created in.
    async fn read_grouped_children(
        &self,
        group: &HierarchyNode,
        variant: &LevelVariant,
    ) -> Result<Vec<ProcessedNode>> {
        let ancestor = group
            .grouping
            .as_ref()
            .and_then(|info| info.non_grouping_ancestor.as_deref());
        let base_len = ancestor.map_or(0, |a| a.child_parent_keys().len());
        let mut chain = match group.parent_keys.get(base_len..) {
            Some(chain) => chain.to_vec(),
            None => {
                return Err(HierarchyError::sticky(
                    ErrorLayer::BadInput,
                    "Grouping node is shallower than its non-grouping ancestor",
                ))
            }
        };
        chain.push(group.key.clone());

        let level = self.read_level(ancestor, variant).await?;
        Ok(match find_grouping_node(level, &chain) {
            Some(found) => match found.children {
                ProcessedChildren::Grouped(children) => children,
                _ => vec![],
            },
            None => {
                trace!(key = ?group.key, "grouping_node_gone");
                vec![]
            }
        })
    }

    async fn read_children(
        &self,
        parent: Option<&HierarchyNode>,
        variant: &LevelVariant,
    ) -> Result<Vec<HierarchyNode>> {
        let processed = match parent {
            Some(group) if group.is_grouping() => {
                self.read_grouped_children(group, variant).await?
            }
            Some(parent) => self.read_level(Some(&parent.as_parent()), variant).await?,
            None => self.read_level(None, variant).await?,
        };
        Ok(processed.into_iter().map(finalize).collect())
    }

    async fn read_instance_keys(
        &self,
        parent: Option<&HierarchyNode>,
        variant: &LevelVariant,
    ) -> Result<Vec<InstanceKey>> {
        if let Some(info) = parent.and_then(|p| p.grouping.as_ref()) {
            return Ok(info.grouped_instance_keys.clone());
        }
        let level = self
            .source_level(parent.map(|p| p.as_parent()), variant.clone())
            .await?;
        Ok(level
            .iter()
            .flat_map(|node| node.instance_keys().iter().cloned())
            .collect())
    }
}

/// Produces hierarchy levels on request.
pub struct HierarchyProvider {
    shared: Arc<ProviderShared>,
    data_changed: Mutex<Option<(Arc<DataChangedEvent>, Uuid)>>,
}

impl HierarchyProvider {
    pub fn new(props: HierarchyProviderProps) -> Self {
        let adapter = build_adapter(&props.definition, &props.inspector, props.filter.as_ref());
        let (changes, _) = broadcast::channel(CHANGES_CAPACITY);
        let config = &props.config;
        let shared = Arc::new(ProviderShared {
            source_definition: props.definition,
            row_source: props.row_source,
            inspector: props.inspector,
            grouping_order: config.grouping_order.clone(),
            state: Mutex::new(ProviderState {
                adapter,
                formatter: props.formatter.unwrap_or_else(default_formatter),
                filter: props.filter,
                token: CancellationToken::new(),
                levels: HierarchyCache::new(
                    config.level_cache.size,
                    config.level_cache.variations_count,
                ),
                children: HierarchyCache::new(
                    config.children_cache.size,
                    config.children_cache.variations_count,
                ),
            }),
            changes,
        });

        let data_changed = props.data_changed.map(|event| {
            let weak = Arc::downgrade(&shared);
            let id = event.add_listener(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.invalidate(HierarchyChange::DataSource, true, |_| {});
                }
            });
            (event, id)
        });

        HierarchyProvider {
            shared,
            data_changed: Mutex::new(data_changed),
        }
    }

    fn loader(&self, ignore_cache: bool) -> LevelLoader {
        let state = self.shared.state.lock().unwrap();
        LevelLoader {
            shared: self.shared.clone(),
            adapter: state.adapter.clone(),
            formatter: state.formatter.clone(),
            token: state.token.clone(),
            ignore_cache,
        }
    }

    /// Stream the nodes of the level under `props.parent_node`.  If the
    /// provider's configuration changes before the stream is done, it ends
    /// early without an error.
    pub fn get_nodes(&self, props: GetHierarchyNodesProps) -> BoxStream<'static, Result<HierarchyNode>> {
        let loader = self.loader(props.ignore_cache);
        let variant = LevelVariant {
            instance_filter: props.instance_filter,
            limit: props.hierarchy_level_size_limit,
        };
        let parent = props.parent_node;
        let span = trace_span!(
            "get_nodes",
            parent = ?parent.as_ref().map(|p| p.label.as_str()),
            ignore_cache = props.ignore_cache
        );
        stream! {
            let token = loader.token.clone();
            let result = tokio::select! {
                _ = token.cancelled() => None,
                result = loader.read_children(parent.as_ref(), &variant).instrument(span) => Some(result),
            };
            match result {
                None => trace!("get_nodes_cancelled"),
                Some(Err(err)) => {
                    if !token.is_cancelled() {
                        yield Err(err);
                    }
                }
                Some(Ok(nodes)) => {
                    for node in nodes {
                        if token.is_cancelled() {
                            trace!("get_nodes_cancelled");
                            break;
                        }
                        yield Ok(node);
                    }
                }
            }
        }
        .boxed()
    }

    /// Stream the instance keys under `props.parent_node`: everything a
    /// grouping node groups, or the instance nodes of the level otherwise.
    pub fn get_node_instance_keys(
        &self,
        props: GetHierarchyNodesProps,
    ) -> BoxStream<'static, Result<InstanceKey>> {
        let loader = self.loader(props.ignore_cache);
        let variant = LevelVariant {
            instance_filter: props.instance_filter,
            limit: props.hierarchy_level_size_limit,
        };
        let parent = props.parent_node;
        stream! {
            let token = loader.token.clone();
            let result = tokio::select! {
                _ = token.cancelled() => None,
                result = loader.read_instance_keys(parent.as_ref(), &variant) => Some(result),
            };
            match result {
                None => trace!("get_node_instance_keys_cancelled"),
                Some(Err(err)) => {
                    if !token.is_cancelled() {
                        yield Err(err);
                    }
                }
                Some(Ok(keys)) => {
                    for key in keys {
                        if token.is_cancelled() {
                            break;
                        }
                        yield Ok(key);
                    }
                }
            }
        }
        .boxed()
    }

    pub fn hierarchy_filter(&self) -> Option<HierarchyFilter> {
        self.shared.state.lock().unwrap().filter.clone()
    }

    pub fn set_hierarchy_filter(&self, filter: Option<HierarchyFilter>) {
        let adapter = self.shared.build_adapter(filter.as_ref());
        let change = HierarchyChange::Filter(filter.clone());
        self.shared.invalidate(change, true, move |state| {
            state.adapter = adapter;
            state.filter = filter;
        });
    }

    /// Swap the label formatter.  Cached levels stay; they get formatted
    /// again on the next read.
    pub fn set_formatter(&self, formatter: Option<Arc<dyn ValueFormatter>>) {
        let formatter = formatter.unwrap_or_else(default_formatter);
        self.shared
            .invalidate(HierarchyChange::Formatter, false, move |state| {
                state.formatter = formatter;
            });
    }

    pub fn notify_data_source_changed(&self) {
        self.shared
            .invalidate(HierarchyChange::DataSource, true, |_| {});
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HierarchyChange> {
        self.shared.changes.subscribe()
    }

    /// Changes made after this call.  Subscribers that fall too far behind
    /// skip the changes they missed.
    pub fn hierarchy_changed(&self) -> BoxStream<'static, HierarchyChange> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|change| future::ready(change.ok()))
            .boxed()
    }

    /// Unsubscribe from data source changes and cancel requests in flight.
    /// Safe to call more than once.
    pub fn dispose(&self) {
        if let Some((event, id)) = self.data_changed.lock().unwrap().take() {
            event.remove_listener(&id);
        }
        self.shared.state.lock().unwrap().token.cancel();
    }
}

impl Drop for HierarchyProvider {
    fn drop(&mut self) {
        self.dispose();
    }
}
