//! Newick input.
//!
//! ```text
//! tree     = subtree ';'
//! subtree  = ('(' subtree (',' subtree)* ')')? name? (':' length)?
//! ```
//! Bracketed comments (`[&rate=0.1]`) count as whitespace. Dated trees for
//! the sampler need a length on every non-root branch; that is checked by
//! the model, not here.

use crate::tree::{Node, NodeId, PhyloTree};
use rateshift_core::{RateShiftError, Result};

/// Parse a Newick string into a [`PhyloTree`]. Nodes are numbered in the
/// order their opening token appears, so the root is node 0.
pub fn parse(input: &str) -> Result<PhyloTree> {
    let mut reader = Reader {
        text: input.as_bytes(),
        cursor: 0,
        arena: Vec::new(),
    };
    let root = reader.subtree(None)?;
    reader.blank()?;
    if !reader.eat(b';') {
        return Err(reader.fail("expected ';'"));
    }
    reader.blank()?;
    if reader.cursor < reader.text.len() {
        return Err(reader.fail("trailing input after ';'"));
    }
    PhyloTree::from_nodes(reader.arena, root)
}

struct Reader<'a> {
    text: &'a [u8],
    cursor: usize,
    arena: Vec<Node>,
}

impl Reader<'_> {
    fn fail(&self, what: &str) -> RateShiftError {
        RateShiftError::Parse(format!("Newick: {} at byte {}", what, self.cursor))
    }

    fn eat(&mut self, byte: u8) -> bool {
        let hit = self.text.get(self.cursor) == Some(&byte);
        if hit {
            self.cursor += 1;
        }
        hit
    }

    fn subtree(&mut self, parent: Option<NodeId>) -> Result<NodeId> {
        self.blank()?;
        let id = self.arena.len();
        self.arena.push(Node {
            id,
            parent,
            children: Vec::new(),
            branch_length: None,
            name: None,
        });

        if self.eat(b'(') {
            loop {
                let child = self.subtree(Some(id))?;
                self.arena[id].children.push(child);
                self.blank()?;
                if self.eat(b')') {
                    break;
                }
                if !self.eat(b',') {
                    return Err(self.fail("expected ',' or ')'"));
                }
            }
        }

        self.blank()?;
        let name = self.token(|b| {
            !b.is_ascii_whitespace() && !matches!(b, b'(' | b')' | b',' | b':' | b';' | b'[')
        });
        if !name.is_empty() {
            self.arena[id].name = Some(name);
        }

        self.blank()?;
        if self.eat(b':') {
            self.blank()?;
            let digits =
                self.token(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'));
            let length = digits
                .parse::<f64>()
                .map_err(|_| self.fail(&format!("bad branch length '{}'", digits)))?;
            self.arena[id].branch_length = Some(length);
        }
        Ok(id)
    }

    fn token(&mut self, accept: impl Fn(u8) -> bool) -> String {
        let from = self.cursor;
        let len = self.text[from..].iter().take_while(|&&b| accept(b)).count();
        self.cursor += len;
        String::from_utf8_lossy(&self.text[from..from + len]).into_owned()
    }

    /// Whitespace and bracketed comments.
    fn blank(&mut self) -> Result<()> {
        loop {
            match self.text.get(self.cursor) {
                Some(b) if b.is_ascii_whitespace() => self.cursor += 1,
                Some(b'[') => match self.text[self.cursor..].iter().position(|&b| b == b']') {
                    Some(close) => self.cursor += close + 1,
                    None => return Err(self.fail("unterminated comment")),
                },
                _ => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tree: &PhyloTree) -> Vec<String> {
        tree.leaves()
            .into_iter()
            .filter_map(|id| tree.get_node(id).and_then(|n| n.name.clone()))
            .collect()
    }

    #[test]
    fn ultrametric_tips_share_a_time() {
        let tree = parse("((A:1,B:1):2,C:3);").unwrap();
        assert_eq!(tree.node_count(), 5);
        assert_eq!(names(&tree), vec!["A", "B", "C"]);
        for leaf in tree.leaves() {
            assert!((tree.time(leaf) - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn interior_labels_kept() {
        let tree = parse("((A,B)AB,(C,D)CD)root;").unwrap();
        assert_eq!(tree.root(), 0);
        let root = tree.get_node(0).unwrap();
        assert_eq!(root.name.as_deref(), Some("root"));
        let cd = tree.node_by_name("CD").unwrap();
        assert_eq!(tree.get_node(cd).unwrap().children.len(), 2);
    }

    #[test]
    fn comments_count_as_blank() {
        let tree = parse("([&x=1]A:1.5[c],B:0.5)[&root];").unwrap();
        assert_eq!(names(&tree), vec!["A", "B"]);
        let a = tree.node_by_name("A").unwrap();
        assert_eq!(tree.get_node(a).unwrap().branch_length, Some(1.5));
    }

    #[test]
    fn spaces_between_tokens() {
        let tree = parse("  ( A : 0.1 , B : 2e-1 ) ; \n").unwrap();
        assert_eq!(tree.leaf_count(), 2);
        let b = tree.node_by_name("B").unwrap();
        assert!((tree.time(b) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn malformed_input_rejected() {
        for bad in [
            "((A,B);",
            "(A,B)",
            "(A:abc,B);",
            "(A:,B);",
            "(A:-1,B:1);",
            "(A[oops,B);",
            "(A,B);(C,D);",
        ] {
            assert!(parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn error_reports_position() {
        let err = parse("(A,B)").unwrap_err().to_string();
        assert!(err.contains("byte 5"), "{}", err);
    }
}
