use rlayer_core::{KeyRange, Subspace};

/// An execution plan (spec §4.9): a tree of scan/combinator nodes produced
/// by the planner (`crate::planner`) and turned into a running cursor tree
/// by `crate::executor::build_cursor`.
#[derive(Clone, Debug, PartialEq)]
pub enum PlanNode {
    /// Scans every record of one type via its primary-key subspace.
    FullScan { subspace: Subspace },
    /// Scans one index's key range. `key_arity` is the number of leading
    /// tuple elements that belong to the index's own key (the rest, for a
    /// non-unique index, is the primary key appended for uniqueness).
    IndexScan { index_name: String, subspace: Subspace, range: KeyRange, key_arity: usize, unique: bool },
    /// `k` nearest neighbors of `query` under one `vector` index.
    VectorTopK { index_name: String, query: Vec<f64>, k: usize },
    /// Primary keys present in every child (a hash-based AND, not a
    /// streaming merge-join — see `DESIGN.md`).
    Intersection(Vec<PlanNode>),
    /// Primary keys present in any child, deduplicated.
    Union(Vec<PlanNode>),
    /// Re-checks a residual predicate the chosen scan couldn't fully
    /// encode; `description` is for plan explainability only.
    Filter { child: Box<PlanNode>, description: String },
    Sort { child: Box<PlanNode> },
    Limit { child: Box<PlanNode>, limit: usize },
}

impl PlanNode {
    pub fn explain(&self) -> String {
        match self {
            PlanNode::FullScan { .. } => "FullScan".to_string(),
            PlanNode::IndexScan { index_name, .. } => format!("IndexScan({index_name})"),
            PlanNode::VectorTopK { index_name, k, .. } => format!("VectorTopK({index_name}, k={k})"),
            PlanNode::Intersection(children) => {
                format!("Intersection[{}]", children.iter().map(PlanNode::explain).collect::<Vec<_>>().join(", "))
            }
            PlanNode::Union(children) => {
                format!("Union[{}]", children.iter().map(PlanNode::explain).collect::<Vec<_>>().join(", "))
            }
            PlanNode::Filter { child, description } => format!("Filter({description}, {})", child.explain()),
            PlanNode::Sort { child } => format!("Sort({})", child.explain()),
            PlanNode::Limit { child, limit } => format!("Limit({limit}, {})", child.explain()),
        }
    }
}
