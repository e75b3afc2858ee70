//! Canonical printing of queries and variables used for cache keys.

use nodecache::cache::{KeyBuilder, canonical_query, canonical_variables, document_id};
use serde_json::json;

#[test]
fn pretty_printed_query_collapses() {
    let document = "query Q($id: ID!) {\n  post(id: $id) {\n    title, # comment\n    author { name }\n  }\n}";

    insta::assert_snapshot!(
        canonical_query(document).expect("canonical"),
        @"query Q($id:ID!){post(id:$id){title author{name}}}"
    );
}

#[test]
fn fragments_and_directives_keep_required_spaces() {
    let document = r#"
        query Feed($first: Int = 10, $draft: Boolean!) {
          posts(first: $first) @include(if: true) {
            ...PostFields
            ... on Page { uri }
          }
        }
        fragment PostFields on Post { id title(format: RENDERED) }
    "#;

    insta::assert_snapshot!(
        canonical_query(document).expect("canonical"),
        @"query Feed($first:Int=10$draft:Boolean!){posts(first:$first)@include(if:true){...PostFields...on Page{uri}}}fragment PostFields on Post{id title(format:RENDERED)}"
    );
}

#[test]
fn nested_variables_are_sorted() {
    let variables = json!({
        "where": {"status": "PUBLISH", "author": 3, "in": [{"b": 1, "a": 2}]},
        "first": 5
    });

    insta::assert_snapshot!(
        canonical_variables(Some(&variables)).expect("canonical"),
        @r#"{"first":5,"where":{"author":3,"in":[{"a":2,"b":1}],"status":"PUBLISH"}}"#
    );
}

#[test]
fn document_ids_match_across_formatting() {
    let compact = document_id("{posts{id}}").expect("id");
    let spaced = document_id("{\n  posts {\n    id\n  }\n}\n").expect("id");

    assert_eq!(compact, spaced);
    assert_eq!(compact.len(), 64);
    assert!(compact.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn permuted_variables_share_a_key() {
    let builder = KeyBuilder::new();
    let query = "query Posts($first: Int, $after: String) { posts(first: $first, after: $after) { id } }";

    let forward = builder
        .build_key(None, Some(query), Some(&json!({"first": 2, "after": "x"})), Some("Posts"))
        .expect("key");
    let backward = builder
        .build_key(None, Some(query), Some(&json!({"after": "x", "first": 2})), Some("Posts"))
        .expect("key");

    assert_eq!(forward, backward);
}
