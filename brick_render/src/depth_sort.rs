//! Painter's ordering for the 2D vector output path.
//!
//! Builds a "drawn before" relation over screen-space primitives from
//! pairwise geometric predicates, then orders it with a cycle-tolerant
//! topological sort: Tarjan's strongly connected components condense the
//! graph into a DAG and Kahn's algorithm orders the components. Primitives
//! inside a component keep their input order, so the sort terminates even
//! when interpenetrating faces make the relation cyclic.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use glam::{DVec3, Vec3};
use log::warn;
use rayon::prelude::*;

/// Side tests use this tolerance. Smaller values cause spurious cycles on
/// coplanar faces.
const EPSILON: f64 = 1e-10;

/// A primitive in screen space: x/y for position, z for depth, orthographic.
/// Larger z is closer to the camera.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Triangle([Vec3; 3]),
    Line([Vec3; 2]),
}

/// Order primitives back to front.
///
/// Returns a permutation of the input indices. Drawing the primitives in the
/// returned order paints nearer primitives over farther ones wherever the
/// pairwise predicates are conclusive.
#[tracing::instrument(skip_all)]
pub fn depth_sort(primitives: &[Primitive]) -> Vec<usize> {
    let prims: Vec<Prim64> = primitives.iter().map(Prim64::new).collect();
    let n = prims.len();

    let prims_ref = &prims;
    let edges: Vec<(u32, u32)> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| {
            (i + 1..n).filter_map(move |j| {
                draw_order(&prims_ref[i], &prims_ref[j]).map(|order| match order {
                    Order::AFirst => (i as u32, j as u32),
                    Order::BFirst => (j as u32, i as u32),
                })
            })
        })
        .collect();

    condensation_order(n, &edges)
}

enum Order {
    /// The first primitive is behind and drawn first.
    AFirst,
    /// The second primitive is behind and drawn first.
    BFirst,
}

enum Shape {
    Triangle {
        vertices: [DVec3; 3],
        /// Unit plane normal, zero for degenerate triangles.
        normal: DVec3,
        /// Plane offset: `normal . p + d == 0` on the plane.
        d: f64,
    },
    Line([DVec3; 2]),
}

struct Prim64 {
    shape: Shape,
    min: DVec3,
    max: DVec3,
}

impl Prim64 {
    fn new(primitive: &Primitive) -> Self {
        match primitive {
            Primitive::Triangle(vertices) => {
                let vertices = vertices.map(|v| v.as_dvec3());
                let normal = (vertices[1] - vertices[0])
                    .cross(vertices[2] - vertices[0])
                    .normalize_or_zero();
                let d = -normal.dot(vertices[0]);
                Self {
                    shape: Shape::Triangle {
                        vertices,
                        normal,
                        d,
                    },
                    min: vertices[0].min(vertices[1]).min(vertices[2]),
                    max: vertices[0].max(vertices[1]).max(vertices[2]),
                }
            }
            Primitive::Line(vertices) => {
                let vertices = vertices.map(|v| v.as_dvec3());
                Self {
                    shape: Shape::Line(vertices),
                    min: vertices[0].min(vertices[1]),
                    max: vertices[0].max(vertices[1]),
                }
            }
        }
    }
}

fn draw_order(a: &Prim64, b: &Prim64) -> Option<Order> {
    // Disjoint screen rectangles never occlude each other.
    if a.max.x < b.min.x || b.max.x < a.min.x || a.max.y < b.min.y || b.max.y < a.min.y {
        return None;
    }

    match (&a.shape, &b.shape) {
        (Shape::Triangle { .. }, Shape::Triangle { .. }) => triangle_order(a, b),
        (Shape::Triangle { .. }, Shape::Line(line)) => {
            line_order(line, a).map(|order| match order {
                LineOrder::TriangleFirst => Order::AFirst,
                LineOrder::LineFirst => Order::BFirst,
            })
        }
        (Shape::Line(line), Shape::Triangle { .. }) => {
            line_order(line, b).map(|order| match order {
                LineOrder::TriangleFirst => Order::BFirst,
                LineOrder::LineFirst => Order::AFirst,
            })
        }
        // Lines do not occlude each other.
        (Shape::Line(_), Shape::Line(_)) => None,
    }
}

fn triangle_order(a: &Prim64, b: &Prim64) -> Option<Order> {
    let (Shape::Triangle {
        vertices: va,
        normal: na,
        d: da,
    }, Shape::Triangle {
        vertices: vb,
        normal: nb,
        d: db,
    }) = (&a.shape, &b.shape)
    else {
        unreachable!();
    };

    if !triangles_overlap_2d(va, vb) {
        return None;
    }

    // Disjoint depth ranges decide immediately.
    if a.max.z < b.min.z {
        return Some(Order::AFirst);
    }
    if b.max.z < a.min.z {
        return Some(Order::BFirst);
    }

    // B entirely on one side of A's plane: the camera direction tells which
    // of the two is in front.
    if na.z.abs() > EPSILON {
        if let Some(side) = plane_side(*na, *da, vb) {
            return Some(if side * na.z > 0.0 {
                Order::AFirst
            } else {
                Order::BFirst
            });
        }
    }

    if nb.z.abs() > EPSILON {
        if let Some(side) = plane_side(*nb, *db, va) {
            return Some(if side * nb.z > 0.0 {
                Order::BFirst
            } else {
                Order::AFirst
            });
        }
    }

    // Coplanar or degenerate. Input order stands.
    None
}

enum LineOrder {
    TriangleFirst,
    LineFirst,
}

fn line_order(line: &[DVec3; 2], triangle: &Prim64) -> Option<LineOrder> {
    let Shape::Triangle {
        vertices,
        normal,
        d,
    } = &triangle.shape
    else {
        unreachable!();
    };

    // An edge-on triangle paints nothing.
    if normal.z.abs() <= EPSILON {
        return None;
    }

    let from_side = |dist: f64| {
        if dist * normal.z > 0.0 {
            LineOrder::TriangleFirst
        } else {
            LineOrder::LineFirst
        }
    };

    let mut overlaps = false;

    // An endpoint inside the projected triangle decides by its plane side.
    for p in line {
        if point_in_triangle_2d(*p, vertices) {
            overlaps = true;
            let dist = normal.dot(*p) + d;
            if dist.abs() > EPSILON {
                return Some(from_side(dist));
            }
        }
    }

    // Otherwise any screen-space crossing with a triangle edge decides, with
    // the line's depth lifted to the crossing point.
    for i in 0..3 {
        let (q1, q2) = (vertices[i], vertices[(i + 1) % 3]);
        if !segments_cross_2d(line[0], line[1], q1, q2) {
            continue;
        }
        overlaps = true;
        let o1 = orient_2d(q1, q2, line[0]);
        let o2 = orient_2d(q1, q2, line[1]);
        let t = o1 / (o1 - o2);
        let z = line[0].z + (line[1].z - line[0].z) * t;
        let crossing = DVec3::new(
            line[0].x + (line[1].x - line[0].x) * t,
            line[0].y + (line[1].y - line[0].y) * t,
            z,
        );
        let dist = normal.dot(crossing) + d;
        if dist.abs() > EPSILON {
            return Some(from_side(dist));
        }
    }

    // Coplanar: edges must stay visible, so the line paints on top.
    overlaps.then_some(LineOrder::TriangleFirst)
}

/// Sign of the side every point sits on, ignoring points on the plane.
/// `None` when points straddle the plane or all of them lie on it.
fn plane_side(normal: DVec3, d: f64, points: &[DVec3; 3]) -> Option<f64> {
    let mut side = 0.0f64;
    for p in points {
        let dist = normal.dot(*p) + d;
        if dist > EPSILON {
            if side < 0.0 {
                return None;
            }
            side = 1.0;
        } else if dist < -EPSILON {
            if side > 0.0 {
                return None;
            }
            side = -1.0;
        }
    }
    (side != 0.0).then_some(side)
}

fn orient_2d(a: DVec3, b: DVec3, c: DVec3) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Strict interior containment. Points on the boundary don't count, so
/// triangles that merely share an edge or vertex produce no ordering edge.
fn point_in_triangle_2d(p: DVec3, triangle: &[DVec3; 3]) -> bool {
    let o1 = orient_2d(triangle[0], triangle[1], p);
    let o2 = orient_2d(triangle[1], triangle[2], p);
    let o3 = orient_2d(triangle[2], triangle[0], p);
    (o1 > EPSILON && o2 > EPSILON && o3 > EPSILON)
        || (o1 < -EPSILON && o2 < -EPSILON && o3 < -EPSILON)
}

/// Proper segment crossing. Touching endpoints don't count.
fn segments_cross_2d(p1: DVec3, p2: DVec3, q1: DVec3, q2: DVec3) -> bool {
    let o1 = orient_2d(p1, p2, q1);
    let o2 = orient_2d(p1, p2, q2);
    let o3 = orient_2d(q1, q2, p1);
    let o4 = orient_2d(q1, q2, p2);
    let opposite = |x: f64, y: f64| (x > EPSILON && y < -EPSILON) || (x < -EPSILON && y > EPSILON);
    opposite(o1, o2) && opposite(o3, o4)
}

/// 2D triangle overlap: a proper edge crossing or full containment either way.
fn triangles_overlap_2d(a: &[DVec3; 3], b: &[DVec3; 3]) -> bool {
    for i in 0..3 {
        for j in 0..3 {
            if segments_cross_2d(a[i], a[(i + 1) % 3], b[j], b[(j + 1) % 3]) {
                return true;
            }
        }
    }
    point_in_triangle_2d(b[0], a) || point_in_triangle_2d(a[0], b)
}

/// Topological order of `0..n` under `edges`, tolerant of cycles.
fn condensation_order(n: usize, edges: &[(u32, u32)]) -> Vec<usize> {
    let mut adjacency = vec![Vec::new(); n];
    for (from, to) in edges {
        adjacency[*from as usize].push(*to);
    }

    let components = tarjan_scc(&adjacency);

    let mut component_of = vec![0usize; n];
    for (id, component) in components.iter().enumerate() {
        for &node in component {
            component_of[node as usize] = id;
        }
    }

    // Kahn over the condensation. Duplicate edges between two components
    // must count once.
    let mut successors = vec![Vec::new(); components.len()];
    let mut indegree = vec![0usize; components.len()];
    let mut seen = std::collections::HashSet::new();
    for (from, to) in edges {
        let (cf, ct) = (component_of[*from as usize], component_of[*to as usize]);
        if cf != ct && seen.insert((cf, ct)) {
            successors[cf].push(ct);
            indegree[ct] += 1;
        }
    }

    // Components become ready in input order of their earliest primitive.
    let component_key: Vec<u32> = components
        .iter()
        .map(|c| *c.iter().min().expect("components are never empty"))
        .collect();

    let mut ready = BinaryHeap::new();
    for (id, &degree) in indegree.iter().enumerate() {
        if degree == 0 {
            ready.push(Reverse((component_key[id], id)));
        }
    }

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse((_, id))) = ready.pop() {
        let mut nodes = components[id].clone();
        if nodes.len() > 1 {
            warn!(
                "Depth order contains a cycle of {} primitives, keeping their input order",
                nodes.len()
            );
        }
        // Within a strongly connected component the input order stands.
        nodes.sort_unstable();
        order.extend(nodes.iter().map(|&node| node as usize));

        for &next in &successors[id] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(Reverse((component_key[next], next)));
            }
        }
    }

    order
}

/// Iterative Tarjan. Returns the strongly connected components.
fn tarjan_scc(adjacency: &[Vec<u32>]) -> Vec<Vec<u32>> {
    let n = adjacency.len();
    const UNVISITED: usize = usize::MAX;

    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<u32> = Vec::new();
    let mut next_index = 0usize;
    let mut components = Vec::new();

    let mut call_stack: Vec<(u32, usize)> = Vec::new();
    for start in 0..n as u32 {
        if index[start as usize] != UNVISITED {
            continue;
        }
        call_stack.push((start, 0));

        while let Some(&mut (node, ref mut edge_index)) = call_stack.last_mut() {
            let v = node as usize;
            if *edge_index == 0 {
                index[v] = next_index;
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(node);
                on_stack[v] = true;
            }

            let mut descend = None;
            while *edge_index < adjacency[v].len() {
                let w = adjacency[v][*edge_index] as usize;
                *edge_index += 1;
                if index[w] == UNVISITED {
                    descend = Some(w as u32);
                    break;
                }
                if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            }

            if let Some(w) = descend {
                call_stack.push((w, 0));
                continue;
            }

            call_stack.pop();
            if let Some(&mut (parent, _)) = call_stack.last_mut() {
                let p = parent as usize;
                lowlink[p] = lowlink[p].min(lowlink[v]);
            }

            if lowlink[v] == index[v] {
                let mut component = Vec::new();
                loop {
                    let w = stack.pop().expect("Tarjan stack cannot underflow");
                    on_stack[w as usize] = false;
                    component.push(w);
                    if w as usize == v {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }

    components
}

#[cfg(test)]
mod tests {
    use super::*;

    use glam::vec3;
    use pretty_assertions::assert_eq;

    fn tri(a: (f32, f32, f32), b: (f32, f32, f32), c: (f32, f32, f32)) -> Primitive {
        Primitive::Triangle([
            vec3(a.0, a.1, a.2),
            vec3(b.0, b.1, b.2),
            vec3(c.0, c.1, c.2),
        ])
    }

    fn line(a: (f32, f32, f32), b: (f32, f32, f32)) -> Primitive {
        Primitive::Line([vec3(a.0, a.1, a.2), vec3(b.0, b.1, b.2)])
    }

    fn is_permutation(order: &[usize], n: usize) -> bool {
        let mut seen = vec![false; n];
        for &i in order {
            if i >= n || seen[i] {
                return false;
            }
            seen[i] = true;
        }
        order.len() == n
    }

    #[test]
    fn test_disjoint_preserves_input_order() {
        let prims = vec![
            tri((0.0, 0.0, 5.0), (1.0, 0.0, 5.0), (0.0, 1.0, 5.0)),
            tri((10.0, 10.0, 0.0), (11.0, 10.0, 0.0), (10.0, 11.0, 0.0)),
        ];
        assert_eq!(vec![0, 1], depth_sort(&prims));
    }

    #[test]
    fn test_depth_disjoint_overlap_orders_by_z() {
        // The nearer triangle comes first in the input, yet is drawn last.
        let prims = vec![
            tri((0.0, 0.0, 5.0), (4.0, 0.0, 5.0), (0.0, 4.0, 5.0)),
            tri((0.5, 0.5, 0.0), (3.0, 0.5, 0.0), (0.5, 3.0, 0.0)),
        ];
        assert_eq!(vec![1, 0], depth_sort(&prims));
    }

    #[test]
    fn test_plane_side_orders_tilted_triangles() {
        // The big triangle rises from z=0 to z=20; the small one floats flat
        // at z=5 over the low corner, so their depth ranges overlap and only
        // the plane test can order them.
        let big = tri((0.0, 0.0, 0.0), (10.0, 0.0, 20.0), (10.0, 10.0, 20.0));
        let small = tri((1.0, 0.1, 5.0), (2.0, 0.1, 5.0), (1.5, 0.5, 5.0));
        assert_eq!(vec![1, 0], depth_sort(&[small.clone(), big.clone()]));
        assert_eq!(vec![0, 1], depth_sort(&[big, small]));
    }

    #[test]
    fn test_shared_edge_makes_no_order() {
        let a = Prim64::new(&tri((0.0, 0.0, 0.0), (1.0, 0.0, 0.0), (0.0, 1.0, 5.0)));
        let b = Prim64::new(&tri((1.0, 0.0, 0.0), (1.0, 1.0, 9.0), (0.0, 1.0, 5.0)));
        assert!(draw_order(&a, &b).is_none());
    }

    #[test]
    fn test_line_above_triangle_drawn_after() {
        let prims = vec![
            line((1.0, 1.0, 9.0), (2.0, 2.0, 9.0)),
            tri((0.0, 0.0, 0.0), (8.0, 0.0, 0.0), (0.0, 8.0, 0.0)),
        ];
        assert_eq!(vec![1, 0], depth_sort(&prims));
    }

    #[test]
    fn test_line_below_triangle_drawn_first() {
        let prims = vec![
            tri((0.0, 0.0, 0.0), (8.0, 0.0, 0.0), (0.0, 8.0, 0.0)),
            line((1.0, 1.0, -9.0), (2.0, 2.0, -9.0)),
        ];
        assert_eq!(vec![1, 0], depth_sort(&prims));
    }

    #[test]
    fn test_line_crossing_triangle_edge() {
        // The line stays outside the projected interior with both endpoints,
        // but crosses an edge above the face.
        let prims = vec![
            line((-1.0, 1.0, 3.0), (9.0, 1.0, 3.0)),
            tri((0.0, 0.0, 0.0), (8.0, 0.0, 0.0), (0.0, 8.0, 0.0)),
        ];
        assert_eq!(vec![1, 0], depth_sort(&prims));
    }

    #[test]
    fn test_coplanar_line_drawn_on_top() {
        let prims = vec![
            line((1.0, 1.0, 0.0), (2.0, 1.0, 0.0)),
            tri((0.0, 0.0, 0.0), (8.0, 0.0, 0.0), (0.0, 8.0, 0.0)),
        ];
        assert_eq!(vec![1, 0], depth_sort(&prims));
    }

    #[test]
    fn test_lines_do_not_order_each_other() {
        let prims = vec![
            line((0.0, 0.0, 9.0), (2.0, 2.0, 9.0)),
            line((0.0, 2.0, 0.0), (2.0, 0.0, 0.0)),
        ];
        assert_eq!(vec![0, 1], depth_sort(&prims));
    }

    #[test]
    fn test_condensation_order_chain() {
        assert_eq!(vec![2, 1, 0], condensation_order(3, &[(2, 1), (1, 0)]));
    }

    #[test]
    fn test_condensation_order_cycle_keeps_input_order() {
        // 0 -> 1 -> 2 -> 0 is one strongly connected component.
        assert_eq!(
            vec![0, 1, 2],
            condensation_order(3, &[(0, 1), (1, 2), (2, 0)])
        );
    }

    #[test]
    fn test_condensation_order_cycle_with_tail() {
        // 3 must precede the cycle {0, 1, 2}; 4 must follow it.
        let edges = [(3, 0), (0, 1), (1, 2), (2, 0), (2, 4)];
        assert_eq!(vec![3, 0, 1, 2, 4], condensation_order(5, &edges));
    }

    #[test]
    fn test_depth_sort_terminates_on_predicate_cycles() {
        // Three interlocking wedges: each one passes above the next, so the
        // pairwise relation is cyclic.
        let prims = vec![
            tri((0.0, 0.0, 0.0), (11.0, -0.5, 11.0), (11.0, 0.5, 11.0)),
            tri((10.0, -0.5, 0.0), (10.0, 0.5, 0.0), (5.0, 10.0, 10.0)),
            tri((6.0, 11.0, 0.0), (4.0, 11.0, 0.0), (0.5, -1.0, 10.0)),
        ];
        let order = depth_sort(&prims);
        assert!(is_permutation(&order, prims.len()));
    }

    #[test]
    fn test_depth_sort_is_a_permutation() {
        let mut prims = Vec::new();
        for i in 0..20 {
            let offset = (i % 5) as f32;
            let z = (20 - i) as f32;
            prims.push(tri(
                (offset, offset, z),
                (offset + 3.0, offset, z),
                (offset, offset + 3.0, z),
            ));
        }
        let order = depth_sort(&prims);
        assert!(is_permutation(&order, prims.len()));
    }
}
