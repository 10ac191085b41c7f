//! Template parser.
//!
//! Scans SQL text left to right, turning directive comments into nodes and
//! everything else into literal text.
//!
//! # Syntax Overview
//!
//! ```text
//! SELECT * FROM users
//! /*BEGIN*/
//! WHERE
//!   /*IF name != null*/ AND name = /*#name*/'alice' /*END*/
//!   /*IF ids != null*/ AND id IN /*PAREN#ids*/(1, 2) /*END*/
//! /*END*/
//! ORDER BY /*$sort*/id
//! ```
//!
//! Directive comments start with `#`, `$`, `PAREN#` or an uppercase keyword
//! (`IF`, `ELSEIF`/`ELIF`, `ELSE`, `END`, `BEGIN`, `FOR`). Other comments are
//! kept as SQL. A literal right after a bind or embed directive is a
//! placeholder for running the template as plain SQL and is dropped.

mod directive;


use crate::error::{TwoSqlError, TwoSqlResult};
use crate::node::{
    BeginNode, BindNode, ElseIfNode, ElseNode, EmbeddedNode, ForNode, IfNode, Node, NodeTree,
    TextNode,
};

use directive::Directive;

/// Parse a template into an immutable node tree.
pub fn parse(template: &str) -> TwoSqlResult<NodeTree> {
    let tree = Parser::new(template).run()?;
    tracing::debug!(
        "parsed template: {} node(s), {} coverage point(s)",
        tree.node_count(),
        tree.coverage_points().len()
    );
    Ok(tree)
}

/// An open block awaiting its `END`.
enum Frame {
    If(IfNode),
    Begin(BeginNode),
    For(ForNode),
}

impl Frame {
    fn position(&self) -> usize {
        match self {
            Frame::If(n) => n.position,
            Frame::Begin(n) => n.position,
            Frame::For(n) => n.position,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Frame::If(_) => "IF",
            Frame::Begin(_) => "BEGIN",
            Frame::For(_) => "FOR",
        }
    }

    /// The child list currently being filled: the last open branch of an `IF`.
    fn children_mut(&mut self) -> &mut Vec<Node> {
        match self {
            Frame::If(node) => match (&mut node.else_branch, node.else_ifs.last_mut()) {
                (Some(branch), _) => &mut branch.children,
                (None, Some(branch)) => &mut branch.children,
                (None, None) => &mut node.children,
            },
            Frame::Begin(node) => &mut node.children,
            Frame::For(node) => &mut node.children,
        }
    }

    fn into_node(self) -> Node {
        match self {
            Frame::If(n) => Node::If(n),
            Frame::Begin(n) => Node::Begin(n),
            Frame::For(n) => Node::For(n),
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    /// Byte offset of the scanner.
    pos: usize,
    /// Byte and char offsets where pending literal text begins.
    text_start: usize,
    text_start_char: usize,
    /// Last (byte, char) offset pair converted.
    cursor: (usize, usize),
    root: Vec<Node>,
    stack: Vec<Frame>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            text_start: 0,
            text_start_char: 0,
            cursor: (0, 0),
            root: Vec::new(),
            stack: Vec::new(),
        }
    }

    fn run(mut self) -> TwoSqlResult<NodeTree> {
        let src = self.src;
        let bytes = src.as_bytes();
        while self.pos < bytes.len() {
            let rest = &src[self.pos..];
            match bytes[self.pos] {
                quote @ (b'\'' | b'"') => self.pos += quoted_len(rest, quote).max(1),
                b'-' if rest.starts_with("--") => self.line_comment()?,
                b'/' if rest.starts_with("/*") => self.block_comment()?,
                _ => self.pos += 1,
            }
        }
        self.flush_text(self.src.len());

        if let Some(frame) = self.stack.last() {
            return Err(TwoSqlError::syntax(
                frame.position(),
                format!("{} block is never closed with END", frame.name()),
            ));
        }
        Ok(NodeTree::new(self.root))
    }

    /// Character offset of a byte offset.
    fn char_at(&mut self, byte: usize) -> usize {
        if byte < self.cursor.0 {
            self.cursor = (0, 0);
        }
        let (from, chars) = self.cursor;
        self.cursor = (byte, chars + self.src[from..byte].chars().count());
        self.cursor.1
    }

    fn line_comment(&mut self) -> TwoSqlResult<()> {
        let start = self.pos;
        let eol = self.src[start..]
            .find('\n')
            .map_or(self.src.len(), |i| start + i);
        self.pos = eol;
        if self.src[start + 2..eol].trim() == "ELSE" {
            let position = self.char_at(start);
            self.flush_text(start);
            self.resume_text(eol);
            self.apply(Directive::Else, position)?;
        }
        Ok(())
    }

    fn block_comment(&mut self) -> TwoSqlResult<()> {
        let src = self.src;
        let start = self.pos;
        let Some(close) = src[start + 2..].find("*/") else {
            let position = self.char_at(start);
            return Err(TwoSqlError::syntax(position, "unterminated block comment"));
        };
        let body = &src[start + 2..start + 2 + close];
        self.pos = start + 2 + close + 2;

        let position = self.char_at(start);
        let Some(directive) = directive::classify(body, position)? else {
            return Ok(());
        };

        self.flush_text(start);
        if directive.takes_dummy() {
            self.pos += dummy_len(&src[self.pos..]);
        }
        self.resume_text(self.pos);
        self.apply(directive, position)
    }

    fn flush_text(&mut self, end: usize) {
        if self.text_start >= end {
            return;
        }
        let position = self.text_start_char;
        let text = self.src[self.text_start..end].to_string();
        self.children().push(Node::Text(TextNode { position, text }));
    }

    fn resume_text(&mut self, byte: usize) {
        self.text_start = byte;
        self.text_start_char = self.char_at(byte);
    }

    fn children(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some(frame) => frame.children_mut(),
            None => &mut self.root,
        }
    }

    fn apply(&mut self, directive: Directive, position: usize) -> TwoSqlResult<()> {
        match directive {
            Directive::Bind(name) => {
                self.children()
                    .push(Node::Bind(BindNode { position, name }));
            }
            Directive::ParenBind(name) => {
                self.children()
                    .push(Node::ParenBind(BindNode { position, name }));
            }
            Directive::Embedded(expression) => {
                self.children()
                    .push(Node::Embedded(EmbeddedNode { position, expression }));
            }
            Directive::If(condition) => self.stack.push(Frame::If(IfNode {
                position,
                condition,
                children: Vec::new(),
                else_ifs: Vec::new(),
                else_branch: None,
            })),
            Directive::ElseIf(condition) => {
                let node = self.open_if(position, "ELSEIF")?;
                node.else_ifs.push(ElseIfNode {
                    position,
                    condition,
                    children: Vec::new(),
                });
            }
            Directive::Else => {
                let node = self.open_if(position, "ELSE")?;
                node.else_branch = Some(ElseNode {
                    position,
                    children: Vec::new(),
                });
            }
            Directive::Begin => self.stack.push(Frame::Begin(BeginNode {
                position,
                children: Vec::new(),
            })),
            Directive::For {
                variable,
                collection,
            } => self.stack.push(Frame::For(ForNode {
                position,
                variable,
                collection,
                children: Vec::new(),
            })),
            Directive::End => {
                let frame = self
                    .stack
                    .pop()
                    .ok_or_else(|| TwoSqlError::syntax(position, "END without an open block"))?;
                let node = frame.into_node();
                self.children().push(node);
            }
        }
        Ok(())
    }

    /// The `IF` on top of the stack, if it can still take another branch.
    fn open_if(&mut self, position: usize, directive: &str) -> TwoSqlResult<&mut IfNode> {
        match self.stack.last_mut() {
            Some(Frame::If(node)) if node.else_branch.is_none() => Ok(node),
            Some(Frame::If(_)) => Err(TwoSqlError::syntax(
                position,
                format!("{} after ELSE", directive),
            )),
            _ => Err(TwoSqlError::syntax(
                position,
                format!("{} without an open IF", directive),
            )),
        }
    }
}

/// Length of a quoted literal starting at `s`, `''` escapes included.
///
/// Returns the rest of the input when the quote is never closed.
pub(crate) fn quoted_len(s: &str, quote: u8) -> usize {
    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Length of the placeholder literal at the start of `s`, or 0.
fn dummy_len(s: &str) -> usize {
    match s.as_bytes().first() {
        Some(&quote @ (b'\'' | b'"')) => quoted_len(s, quote),
        Some(b'(') => paren_len(s),
        _ => s
            .char_indices()
            .find(|&(i, c)| {
                c.is_whitespace()
                    || ",;()=<>|!".contains(c)
                    || s[i..].starts_with("/*")
                    || s[i..].starts_with("--")
            })
            .map_or(s.len(), |(i, _)| i),
    }
}

/// Length of a balanced parenthesized group, or 0 when it never closes.
fn paren_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            quote @ (b'\'' | b'"') => {
                i += quoted_len(&s[i..], quote);
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    0
}
