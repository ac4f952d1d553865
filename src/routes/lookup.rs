// Route lookup engine with longest prefix matching

use super::{RouteEntry, RouteTable};

pub struct RouteEngine<'a> {
    routes: &'a [RouteEntry],
}

impl<'a> RouteEngine<'a> {
    pub fn new(routing_table: &'a RouteTable) -> Self {
        RouteEngine {
            routes: routing_table.entries(),
        }
    }

    /// Find the best matching route for a destination address using longest prefix matching
    pub fn lookup(&self, dest: u32) -> Option<&'a RouteEntry> {
        let mut best_match: Option<&RouteEntry> = None;

        for route in self.routes {
            if !route.prefix.contains(dest) {
                continue;
            }
            match best_match {
                None => best_match = Some(route),
                Some(current) if route.prefix.len > current.prefix.len => {
                    best_match = Some(route);
                }
                _ => {}
            }
        }

        best_match
    }
}
