/// One item of a parsed hints expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintNode {
    /// `+name` (include) or `-name` (exclude)
    Field { name: String, include: bool },
    /// `*name(children)`: eager-load a relation, optionally shaping its target
    Collection { name: String, children: Vec<HintNode> },
    /// `!type(children)`: hints that apply only to one polymorphic subtype
    Cast { cast: String, children: Vec<HintNode> },
}

impl HintNode {
    pub fn name(&self) -> &str {
        match self {
            HintNode::Field { name, .. } | HintNode::Collection { name, .. } => name,
            HintNode::Cast { cast, .. } => cast,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSlice {
    Index(i64),
    Range(i64, i64),
}

/// Parsed form of `verb!cast@pk,pk/drilldown[slice]:hints`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteDirective {
    pub verb: String,
    pub cast: Option<String>,
    pub pkey: Option<Vec<String>>,
    pub drilldown: Option<String>,
    pub slice: Option<RouteSlice>,
    pub hints: Vec<HintNode>,
}
