//! Chains same-named road fragments that touch into continuous streets.
//!
//! Each pass groups streets by name, links fragments whose linestrings intersect,
//! and folds every connected group into one path. Passes repeat until nothing
//! merges, so the output is its own fixpoint.

use crate::streets::Street;
use geo::{BoundingRect, Coord, Distance, Euclidean, Intersects, LineString, Point};
use log::{debug, info};
use rstar::{AABB, RTree, RTreeObject};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Splice {
    FirstFirst,
    FirstLast,
    LastFirst,
    LastLast,
}

/// A fragment's bounding box in the per-name spatial index.
struct FragmentBox {
    index: usize,
    bbox: AABB<[f64; 2]>,
}

impl RTreeObject for FragmentBox {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.bbox
    }
}

pub fn merge_streets(mut streets: Vec<Street>) -> Vec<Street> {
    let input = streets.len();
    let mut passes = 0;
    loop {
        passes += 1;
        let before = streets.len();
        streets = merge_pass(streets);
        if streets.len() == before {
            break;
        }
    }
    info!(
        "Merged {} fragments into {} streets in {} passes",
        input,
        streets.len(),
        passes
    );
    streets
}

/// One grouping round. Result order follows each component's first fragment.
fn merge_pass(streets: Vec<Street>) -> Vec<Street> {
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); streets.len()];
    let mut components: Vec<Vec<usize>> = Vec::new();
    {
        let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, street) in streets.iter().enumerate() {
            // An empty name is no identity at all
            if !street.name.is_empty() {
                groups.entry(street.name.as_str()).or_default().push(index);
            }
        }

        let mut seen = vec![false; streets.len()];
        for members in groups.values() {
            link_touching(&streets, members, &mut adjacency);
            components.extend(connected_components(members, &adjacency, &mut seen));
        }
    }

    let mut slots: Vec<Option<Street>> = streets.into_iter().map(Some).collect();
    let mut in_chain = vec![false; slots.len()];
    for component in components.iter().filter(|c| c.len() > 1) {
        if let Some(merged) = fold_component(component[0], &adjacency, &mut slots, &mut in_chain) {
            slots[component[0]] = Some(merged);
        }
    }

    slots.into_iter().flatten().collect()
}

/// Add an edge for every pair of members whose linestrings intersect.
///
/// Candidate pairs come from an R-tree over the members' bounding boxes.
fn link_touching(streets: &[Street], members: &[usize], adjacency: &mut [Vec<usize>]) {
    if members.len() < 2 {
        return;
    }

    let boxes: Vec<FragmentBox> = members
        .iter()
        .filter_map(|&index| {
            let rect = streets[index].path.bounding_rect()?;
            Some(FragmentBox {
                index,
                bbox: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            })
        })
        .collect();
    let tree = RTree::bulk_load(boxes);

    for fragment in tree.iter() {
        let a = fragment.index;
        for candidate in tree.locate_in_envelope_intersecting(&fragment.bbox) {
            let b = candidate.index;
            if b > a && streets[a].path.intersects(&streets[b].path) {
                adjacency[a].push(b);
                adjacency[b].push(a);
            }
        }
    }
}

/// Components over `members` (ascending indices), each sorted ascending.
fn connected_components(members: &[usize], adjacency: &[Vec<usize>], seen: &mut [bool]) -> Vec<Vec<usize>> {
    let mut components = Vec::new();

    for &start in members {
        if seen[start] {
            continue;
        }
        seen[start] = true;
        let mut component = vec![start];
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            for &next in &adjacency[current] {
                if !seen[next] {
                    seen[next] = true;
                    component.push(next);
                    stack.push(next);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }
    components
}

/// Walk a component from its lowest index `start`, always splicing the lowest-index
/// fragment that touches something already merged. Takes the fragments out of `slots`.
fn fold_component(
    start: usize,
    adjacency: &[Vec<usize>],
    slots: &mut [Option<Street>],
    in_chain: &mut [bool],
) -> Option<Street> {
    let first = slots[start].take()?;
    let name = first.name;
    let mut chain: VecDeque<Coord> = first.path.0.into();
    in_chain[start] = true;

    // Min-heap of fragments adjacent to the chain; stale entries are skipped on pop
    let mut frontier: BinaryHeap<Reverse<usize>> =
        adjacency[start].iter().map(|&n| Reverse(n)).collect();

    while let Some(Reverse(next)) = frontier.pop() {
        if in_chain[next] {
            continue;
        }
        in_chain[next] = true;
        frontier.extend(
            adjacency[next]
                .iter()
                .filter(|&&n| !in_chain[n])
                .map(|&n| Reverse(n)),
        );

        if let Some(fragment) = slots[next].take() {
            debug!(
                "Splicing fragment of '{}' ({} + {} points)",
                name,
                chain.len(),
                fragment.path.0.len()
            );
            splice(&mut chain, fragment.path.0);
        }
    }

    Some(Street {
        name,
        path: LineString::new(chain.into()),
    })
}

/// Join `other` onto `chain` at the closest pair of endpoints.
///
/// The result reads head to tail through both fragments and keeps every vertex,
/// including the coincident junction points.
fn splice(chain: &mut VecDeque<Coord>, other: Vec<Coord>) {
    let (Some(&first), Some(&last)) = (chain.front(), chain.back()) else {
        chain.extend(other);
        return;
    };
    let (Some(&other_first), Some(&other_last)) = (other.first(), other.last()) else {
        return;
    };

    match closest_endpoints(first, last, other_first, other_last) {
        // Pushing to the front one by one lays `other` down reversed
        Splice::FirstFirst => other.into_iter().for_each(|c| chain.push_front(c)),
        Splice::FirstLast => other.into_iter().rev().for_each(|c| chain.push_front(c)),
        Splice::LastFirst => chain.extend(other),
        Splice::LastLast => chain.extend(other.into_iter().rev()),
    }
}

// Ties resolve to the earliest candidate in ff, fl, lf, ll order
fn closest_endpoints(first: Coord, last: Coord, other_first: Coord, other_last: Coord) -> Splice {
    let candidates = [
        (Splice::FirstFirst, distance(first, other_first)),
        (Splice::FirstLast, distance(first, other_last)),
        (Splice::LastFirst, distance(last, other_first)),
        (Splice::LastLast, distance(last, other_last)),
    ];

    let mut best = candidates[0];
    for candidate in &candidates[1..] {
        if candidate.1 < best.1 {
            best = *candidate;
        }
    }
    best.0
}

fn distance(a: Coord, b: Coord) -> f64 {
    Euclidean.distance(Point::from(a), Point::from(b))
}
