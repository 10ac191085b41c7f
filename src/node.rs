//! The parsed template tree and its transform protocol.
//!
//! A [`NodeTree`] is immutable once built. Every transform walks it with a
//! fresh [`TransformContext`], so one tree can serve many threads at once.

use std::collections::BTreeMap;
use std::fmt::{self, Write};

use crate::context::TransformContext;
use crate::coverage::{CoveragePoint, PointKind};
use crate::error::{TwoSqlError, TwoSqlResult};
use crate::expr::Expression;
use crate::value::{Scope, Value};

/// A node of the template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal SQL
    Text(TextNode),
    /// `/*#name*/`
    Bind(BindNode),
    /// `/*PAREN#name*/`
    ParenBind(BindNode),
    /// `/*$expr*/`
    Embedded(EmbeddedNode),
    If(IfNode),
    Begin(BeginNode),
    For(ForNode),
    Container(ContainerNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub position: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindNode {
    pub position: usize,
    /// Parameter name, possibly a dotted path.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedNode {
    pub position: usize,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfNode {
    pub position: usize,
    pub condition: Expression,
    pub children: Vec<Node>,
    pub else_ifs: Vec<ElseIfNode>,
    pub else_branch: Option<ElseNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElseIfNode {
    pub position: usize,
    pub condition: Expression,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElseNode {
    pub position: usize,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeginNode {
    pub position: usize,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForNode {
    pub position: usize,
    pub variable: String,
    pub collection: Expression,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerNode {
    pub position: usize,
    pub children: Vec<Node>,
}

impl Node {
    pub fn position(&self) -> usize {
        match self {
            Node::Text(n) => n.position,
            Node::Bind(n) | Node::ParenBind(n) => n.position,
            Node::Embedded(n) => n.position,
            Node::If(n) => n.position,
            Node::Begin(n) => n.position,
            Node::For(n) => n.position,
            Node::Container(n) => n.position,
        }
    }

    pub fn transform(&self, ctx: &mut TransformContext<'_>) -> TwoSqlResult<()> {
        match self {
            Node::Text(n) => {
                ctx.push_sql(&n.text);
                Ok(())
            }
            Node::Bind(n) => n.transform(ctx),
            Node::ParenBind(n) => n.transform_paren(ctx),
            Node::Embedded(n) => n.transform(ctx),
            Node::If(n) => n.transform(ctx),
            Node::Begin(n) => n.transform(ctx),
            Node::For(n) => n.transform(ctx),
            Node::Container(n) => transform_all(&n.children, ctx),
        }
    }

    /// Direct children, across every branch of an `IF`.
    fn child_lists(&self) -> Vec<&[Node]> {
        match self {
            Node::If(n) => {
                let mut lists = vec![n.children.as_slice()];
                lists.extend(n.else_ifs.iter().map(|e| e.children.as_slice()));
                if let Some(e) = &n.else_branch {
                    lists.push(e.children.as_slice());
                }
                lists
            }
            Node::Begin(n) => vec![n.children.as_slice()],
            Node::For(n) => vec![n.children.as_slice()],
            Node::Container(n) => vec![n.children.as_slice()],
            Node::Text(_) | Node::Bind(_) | Node::ParenBind(_) | Node::Embedded(_) => Vec::new(),
        }
    }
}

fn transform_all(nodes: &[Node], ctx: &mut TransformContext<'_>) -> TwoSqlResult<()> {
    for node in nodes {
        node.transform(ctx)?;
    }
    Ok(())
}

impl BindNode {
    fn lookup(&self, ctx: &TransformContext<'_>) -> TwoSqlResult<Value> {
        ctx.resolve(&self.name)
            .cloned()
            .ok_or_else(|| TwoSqlError::UnboundParameter {
                name: self.name.clone(),
                position: self.position,
            })
    }

    fn transform(&self, ctx: &mut TransformContext<'_>) -> TwoSqlResult<()> {
        let value = self.lookup(ctx)?;
        ctx.push_bind(&self.name, value);
        Ok(())
    }

    fn transform_paren(&self, ctx: &mut TransformContext<'_>) -> TwoSqlResult<()> {
        match self.lookup(ctx)? {
            Value::List(items) if items.is_empty() => Err(TwoSqlError::EmptyListBind {
                name: self.name.clone(),
                position: self.position,
            }),
            Value::List(items) => {
                ctx.push_bind_list(&self.name, items);
                Ok(())
            }
            scalar => {
                ctx.push_sql("(");
                ctx.push_bind(&self.name, scalar);
                ctx.push_sql(")");
                Ok(())
            }
        }
    }
}

impl EmbeddedNode {
    fn transform(&self, ctx: &mut TransformContext<'_>) -> TwoSqlResult<()> {
        let text = self.expression.evaluate(&*ctx)?.sql_text()?;
        ctx.push_sql(&text);
        ctx.set_enabled();
        Ok(())
    }
}

impl IfNode {
    fn transform(&self, ctx: &mut TransformContext<'_>) -> TwoSqlResult<()> {
        let taken = self.condition.test(&*ctx)?;
        tracing::trace!("IF at {} ({}) -> {}", self.position, self.condition, taken);
        ctx.coverage_mut().record_branch(self.position, taken);
        if taken {
            return take_branch(&self.children, ctx);
        }

        for branch in &self.else_ifs {
            let taken = branch.condition.test(&*ctx)?;
            tracing::trace!("ELSEIF at {} ({}) -> {}", branch.position, branch.condition, taken);
            ctx.coverage_mut().record_branch(branch.position, taken);
            if taken {
                return take_branch(&branch.children, ctx);
            }
        }

        match &self.else_branch {
            Some(branch) => take_branch(&branch.children, ctx),
            None => Ok(()),
        }
    }
}

fn take_branch(children: &[Node], ctx: &mut TransformContext<'_>) -> TwoSqlResult<()> {
    transform_all(children, ctx)?;
    ctx.set_enabled();
    Ok(())
}

impl BeginNode {
    fn transform(&self, ctx: &mut TransformContext<'_>) -> TwoSqlResult<()> {
        let mut child = ctx.fork();
        transform_all(&self.children, &mut child)?;

        let enabled = child.is_enabled();
        child.coverage_mut().record_branch(self.position, enabled);
        tracing::trace!("BEGIN at {} enabled={}", self.position, enabled);
        if !enabled {
            ctx.discard(child);
            return Ok(());
        }
        if ctx.at_clause_start() {
            child.strip_leading_connective();
        }
        ctx.merge(child);
        Ok(())
    }
}

impl ForNode {
    fn transform(&self, ctx: &mut TransformContext<'_>) -> TwoSqlResult<()> {
        let items = match self.collection.evaluate(&*ctx)? {
            Value::List(items) => items,
            other => {
                return Err(TwoSqlError::NotIterable {
                    expression: self.collection.source().to_string(),
                    position: self.position,
                    kind: other.kind(),
                });
            }
        };

        let count = items.len();
        for (index, item) in items.into_iter().enumerate() {
            ctx.push_frame(self.frame(item, index, count));
            let result = transform_all(&self.children, ctx);
            ctx.pop_frame();
            result?;
        }

        ctx.coverage_mut().record_loop(self.position, count);
        if count > 0 {
            ctx.set_enabled();
        }
        Ok(())
    }

    fn frame(&self, item: Value, index: usize, count: usize) -> BTreeMap<String, Value> {
        let var = &self.variable;
        let mut frame = BTreeMap::new();
        frame.insert(var.clone(), item);
        frame.insert(format!("{var}_index"), Value::Int(index as i64));
        frame.insert(format!("{var}_has_next"), Value::Bool(index + 1 < count));
        frame.insert(format!("{var}_is_first"), Value::Bool(index == 0));
        frame.insert(format!("{var}_is_last"), Value::Bool(index + 1 == count));
        frame
    }
}

/// A parsed template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeTree {
    root: ContainerNode,
}

impl NodeTree {
    pub(crate) fn new(children: Vec<Node>) -> Self {
        Self {
            root: ContainerNode {
                position: 0,
                children,
            },
        }
    }

    /// Top-level nodes in source order.
    pub fn nodes(&self) -> &[Node] {
        &self.root.children
    }

    /// Render this tree into `ctx`.
    pub fn transform(&self, ctx: &mut TransformContext<'_>) -> TwoSqlResult<()> {
        transform_all(&self.root.children, ctx)
    }

    /// Every `IF`, `ELSEIF`, `BEGIN` and `FOR` in the tree, ordered by position.
    pub fn coverage_points(&self) -> Vec<CoveragePoint> {
        let mut points = Vec::new();
        collect_points(&self.root.children, &mut points);
        points.sort_by_key(|p| p.position);
        points
    }

    /// Total number of nodes below the root.
    pub fn node_count(&self) -> usize {
        fn count(nodes: &[Node]) -> usize {
            nodes
                .iter()
                .map(|n| 1 + n.child_lists().into_iter().map(count).sum::<usize>())
                .sum()
        }
        count(&self.root.children)
    }

    /// An indented, human-readable listing of the tree.
    pub fn outline(&self) -> String {
        let mut out = Outline::default();
        // Writing into a String cannot fail.
        let _ = out.visit_all(&self.root.children);
        out.buffer
    }
}

fn collect_points(nodes: &[Node], points: &mut Vec<CoveragePoint>) {
    for node in nodes {
        let kind = match node {
            Node::If(_) => Some(PointKind::If),
            Node::Begin(_) => Some(PointKind::Begin),
            Node::For(_) => Some(PointKind::For),
            _ => None,
        };
        if let Some(kind) = kind {
            points.push(CoveragePoint {
                position: node.position(),
                kind,
            });
        }
        if let Node::If(n) = node {
            points.extend(n.else_ifs.iter().map(|e| CoveragePoint {
                position: e.position,
                kind: PointKind::ElseIf,
            }));
        }
        for children in node.child_lists() {
            collect_points(children, points);
        }
    }
}

#[derive(Default)]
struct Outline {
    indent_level: usize,
    buffer: String,
}

impl Outline {
    fn line(&mut self, position: usize, args: fmt::Arguments<'_>) -> fmt::Result {
        write!(self.buffer, "{:>5}  ", position)?;
        for _ in 0..self.indent_level {
            self.buffer.push_str("  ");
        }
        self.buffer.write_fmt(args)?;
        self.buffer.push('\n');
        Ok(())
    }

    fn nested(&mut self, nodes: &[Node]) -> fmt::Result {
        self.indent_level += 1;
        self.visit_all(nodes)?;
        self.indent_level -= 1;
        Ok(())
    }

    fn visit_all(&mut self, nodes: &[Node]) -> fmt::Result {
        for node in nodes {
            self.visit(node)?;
        }
        Ok(())
    }

    fn visit(&mut self, node: &Node) -> fmt::Result {
        match node {
            Node::Text(n) => self.line(n.position, format_args!("text {:?}", n.text)),
            Node::Bind(n) => self.line(n.position, format_args!("bind #{}", n.name)),
            Node::ParenBind(n) => self.line(n.position, format_args!("bind PAREN#{}", n.name)),
            Node::Embedded(n) => self.line(n.position, format_args!("embed ${}", n.expression)),
            Node::If(n) => {
                self.line(n.position, format_args!("IF {}", n.condition))?;
                self.nested(&n.children)?;
                for branch in &n.else_ifs {
                    self.line(branch.position, format_args!("ELSEIF {}", branch.condition))?;
                    self.nested(&branch.children)?;
                }
                if let Some(branch) = &n.else_branch {
                    self.line(branch.position, format_args!("ELSE"))?;
                    self.nested(&branch.children)?;
                }
                Ok(())
            }
            Node::Begin(n) => {
                self.line(n.position, format_args!("BEGIN"))?;
                self.nested(&n.children)
            }
            Node::For(n) => {
                self.line(
                    n.position,
                    format_args!("FOR {} IN {}", n.variable, n.collection),
                )?;
                self.nested(&n.children)
            }
            Node::Container(n) => self.visit_all(&n.children),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformOptions;
    use crate::parser::parse;
    use crate::value::Params;

    fn render(template: &str, params: &Params) -> TwoSqlResult<String> {
        let tree = parse(template)?;
        let options = TransformOptions::verbatim();
        let mut ctx = TransformContext::new(params, &options);
        tree.transform(&mut ctx)?;
        Ok(ctx.sql().to_string())
    }

    #[test]
    fn test_text_does_not_enable_begin() {
        let sql = render("SELECT 1 /*BEGIN*/WHERE x = 1/*END*/", &Params::new()).unwrap();
        assert_eq!(sql, "SELECT 1 ");
    }

    #[test]
    fn test_begin_strips_connective_after_where() {
        let params = Params::new().param("b", 2);
        let sql = render(
            "SELECT 1 WHERE /*BEGIN*//*IF a != null*/a = /*#a*/0/*END*/ /*IF b != null*/AND b = /*#b*/0/*END*//*END*/",
            &params,
        )
        .unwrap();
        assert_eq!(sql, "SELECT 1 WHERE b = ?");
    }

    #[test]
    fn test_paren_scalar() {
        let params = Params::new().param("id", 7);
        let sql = render("id IN /*PAREN#id*/(1)", &params).unwrap();
        assert_eq!(sql, "id IN (?)");
    }

    #[test]
    fn test_embedded_value() {
        let params = Params::new().param("table", "users");
        let sql = render("SELECT * FROM /*$table*/dummy", &params).unwrap();
        assert_eq!(sql, "SELECT * FROM users");
    }

    #[test]
    fn test_for_not_iterable() {
        let params = Params::new().param("xs", 3);
        let err = render("/*FOR x IN xs*//*#x*/1/*END*/", &params).unwrap_err();
        assert!(matches!(err, TwoSqlError::NotIterable { position: 0, .. }));
    }

    #[test]
    fn test_loop_variables() {
        let params = Params::new().param("cols", vec!["a", "b", "c"]);
        let sql = render(
            "/*FOR c IN cols*//*$c*/x/*IF c_has_next*/, /*END*//*END*/",
            &params,
        )
        .unwrap();
        assert_eq!(sql, "a, b, c");
    }

    #[test]
    fn test_missing_bind() {
        let err = render("WHERE a = /*#a*/1", &Params::new()).unwrap_err();
        assert!(matches!(err, TwoSqlError::UnboundParameter { position: 10, .. }));
    }

    #[test]
    fn test_coverage_points_and_count() {
        let tree = parse(
            "/*BEGIN*//*IF a*/A/*ELSEIF b*/B/*ELSE*/C/*END*//*END*/ /*FOR x IN xs*/x/*END*/",
        )
        .unwrap();
        let kinds: Vec<PointKind> = tree.coverage_points().iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![PointKind::Begin, PointKind::If, PointKind::ElseIf, PointKind::For]
        );
        assert_eq!(tree.node_count(), 8);
    }

    #[test]
    fn test_outline() {
        let tree = parse("SELECT /*IF a*/a/*END*/").unwrap();
        let outline = tree.outline();
        let lines: Vec<&str> = outline.lines().collect();
        assert_eq!(lines, vec![
            "    0  text \"SELECT \"",
            "    7  IF a",
            "   15    text \"a\"",
        ]);
    }
}
