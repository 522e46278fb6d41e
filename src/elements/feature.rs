use std::cmp::Ordering;
use std::fmt;

use crate::utils::{Error, Result};

#[derive(Debug, Eq, PartialEq, Clone, Copy, Ord, PartialOrd, Hash, serde::Serialize)]
pub enum ElementType {
    Node,
    Way,
    Relation,
}

impl ElementType {
    pub fn from_int(t: u64) -> Result<ElementType> {
        match t {
            0 => Ok(ElementType::Node),
            1 => Ok(ElementType::Way),
            2 => Ok(ElementType::Relation),
            _ => Err(Error::InvalidData(format!("wrong element type {}", t))),
        }
    }

    pub fn as_int(&self) -> u64 {
        match self {
            ElementType::Node => 0,
            ElementType::Way => 1,
            ElementType::Relation => 2,
        }
    }
}

/// Typed feature identity: node 5 and way 5 are different features.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Ord, PartialOrd, Hash, serde::Serialize)]
pub struct ElementId {
    pub elem_type: ElementType,
    pub id: i64,
}

impl ElementId {
    pub fn new(elem_type: ElementType, id: i64) -> ElementId {
        ElementId { elem_type, id }
    }
    pub fn node(id: i64) -> ElementId {
        ElementId::new(ElementType::Node, id)
    }
    pub fn way(id: i64) -> ElementId {
        ElementId::new(ElementType::Way, id)
    }
    pub fn relation(id: i64) -> ElementId {
        ElementId::new(ElementType::Relation, id)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.elem_type {
            ElementType::Node => write!(f, "n{}", self.id),
            ElementType::Way => write!(f, "w{}", self.id),
            ElementType::Relation => write!(f, "r{}", self.id),
        }
    }
}

#[derive(Debug, Eq, PartialEq, Clone, serde::Serialize)]
pub struct Tag {
    pub key: String,
    pub val: String,
}

impl Tag {
    pub fn new(key: String, val: String) -> Tag {
        Tag { key, val }
    }
}

pub fn tags_from(kvs: &[(&str, &str)]) -> Vec<Tag> {
    kvs.iter()
        .map(|(k, v)| Tag::new(String::from(*k), String::from(*v)))
        .collect()
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Node {
    pub id: i64,
    pub lon: i32,
    pub lat: i32,
    pub tags: Vec<Tag>,
}

impl Node {
    pub fn new(id: i64, lon: i32, lat: i32, tags: Vec<Tag>) -> Node {
        Node { id, lon, lat, tags }
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Way {
    pub id: i64,
    pub tags: Vec<Tag>,
    pub refs: Vec<i64>,
}

impl Way {
    pub fn new(id: i64, tags: Vec<Tag>, refs: Vec<i64>) -> Way {
        Way { id, tags, refs }
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Member {
    pub role: String,
    pub mem_type: ElementType,
    pub mem_ref: i64,
}

impl Member {
    pub fn new(role: String, mem_type: ElementType, mem_ref: i64) -> Member {
        Member {
            role,
            mem_type,
            mem_ref,
        }
    }

    pub fn element_id(&self) -> ElementId {
        ElementId::new(self.mem_type, self.mem_ref)
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Relation {
    pub id: i64,
    pub tags: Vec<Tag>,
    pub members: Vec<Member>,
}

impl Relation {
    pub fn new(id: i64, tags: Vec<Tag>, members: Vec<Member>) -> Relation {
        Relation { id, tags, members }
    }

    pub fn has_relation_members(&self) -> bool {
        self.members
            .iter()
            .any(|m| m.mem_type == ElementType::Relation)
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum Feature {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Feature {
    pub fn element_id(&self) -> ElementId {
        match self {
            Feature::Node(n) => ElementId::node(n.id),
            Feature::Way(w) => ElementId::way(w.id),
            Feature::Relation(r) => ElementId::relation(r.id),
        }
    }

    pub fn elem_type(&self) -> ElementType {
        self.element_id().elem_type
    }

    pub fn tags(&self) -> &Vec<Tag> {
        match self {
            Feature::Node(n) => &n.tags,
            Feature::Way(w) => &w.tags,
            Feature::Relation(r) => &r.tags,
        }
    }
}

impl PartialOrd for Feature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.element_id().cmp(&other.element_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_type_ints() {
        for t in &[ElementType::Node, ElementType::Way, ElementType::Relation] {
            assert_eq!(ElementType::from_int(t.as_int()).unwrap(), *t);
        }
        assert!(ElementType::from_int(3).is_err());
    }

    #[test]
    fn test_feature_order() {
        let n = Feature::Node(Node::new(10, 0, 0, Vec::new()));
        let w = Feature::Way(Way::new(1, Vec::new(), vec![10, 11]));
        assert!(n < w);
        assert_eq!(w.element_id().to_string(), "w1");
        let r = Relation::new(3, tags_from(&[("type", "route")]), vec![Member::new(String::new(), ElementType::Relation, 4)]);
        assert!(r.has_relation_members());
        assert_eq!(r.members[0].element_id(), ElementId::relation(4));
    }
}
