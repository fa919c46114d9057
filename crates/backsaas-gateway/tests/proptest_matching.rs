use axum::http::HeaderMap;
use backsaas_gateway::config::{BackendConfig, RouteConfig};
use backsaas_gateway::router::RouteTable;
use proptest::prelude::*;

fn route(prefix: &str) -> RouteConfig {
    RouteConfig {
        description: prefix.to_string(),
        path_prefix: Some(prefix.to_string()),
        backend: BackendConfig {
            url: Some("http://upstream:8080".to_string()),
            ..BackendConfig::default()
        },
        ..RouteConfig::default()
    }
}

/// Strategy for a chain of nested prefixes rooted at a random segment,
/// e.g. `/api`, `/api/v1`, `/api/v1/users`.
fn arb_prefix_chain() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,8}", 1..5).prop_map(|segments| {
        let mut prefixes = Vec::with_capacity(segments.len());
        let mut acc = String::new();
        for segment in segments {
            acc.push('/');
            acc.push_str(&segment);
            prefixes.push(acc.clone());
        }
        prefixes
    })
}

proptest! {
    /// If two routes match, the longer declared prefix always wins,
    /// regardless of declaration order.
    #[test]
    fn longest_prefix_wins(chain in arb_prefix_chain(), reversed in any::<bool>()) {
        let mut configs: Vec<RouteConfig> = chain.iter().map(|p| route(p)).collect();
        if reversed {
            configs.reverse();
        }
        let table = RouteTable::new(configs);

        let deepest = chain.last().unwrap().clone();
        let request_path = format!("{deepest}/extra");
        let matched = table
            .find(None, &request_path, &HeaderMap::new(), None)
            .unwrap();
        prop_assert_eq!(
            matched.route.config.path_prefix.as_deref(),
            Some(deepest.as_str())
        );
    }

    /// A request under a shallower prefix never selects a deeper one.
    #[test]
    fn deeper_prefix_never_steals(chain in arb_prefix_chain()) {
        prop_assume!(chain.len() >= 2);
        let table = RouteTable::new(chain.iter().map(|p| route(p)).collect());

        // Uppercase suffix: cannot collide with any lowercase prefix chain.
        let shallow = chain[0].clone();
        let request_path = format!("{shallow}/ZZZ");
        let matched = table
            .find(None, &request_path, &HeaderMap::new(), None)
            .unwrap();
        prop_assert_eq!(
            matched.route.config.path_prefix.as_deref(),
            Some(shallow.as_str())
        );
    }

    /// Matching is a pure function of the request: two identical calls
    /// select the same route.
    #[test]
    fn matching_is_deterministic(chain in arb_prefix_chain()) {
        let table = RouteTable::new(chain.iter().map(|p| route(p)).collect());
        let path = format!("{}/x", chain.last().unwrap());
        let a = table.find(None, &path, &HeaderMap::new(), None).map(|m| m.route.index);
        let b = table.find(None, &path, &HeaderMap::new(), None).map(|m| m.route.index);
        prop_assert_eq!(a, b);
    }
}
