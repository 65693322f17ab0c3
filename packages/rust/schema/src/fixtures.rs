//! Remote schema used across tests.

pub(crate) const REMOTE_SDL: &str = r#"
    schema {
        query: Query
        mutation: Mutation
        subscription: Subscription
    }

    scalar JSON

    enum Status { DRAFT PUBLISHED }

    interface Node { id: ID! }

    type Author implements Node {
        id: ID!
        name: String
    }

    type Article implements Node {
        id: ID!
        title: String
        status: Status
        author: Author
        tags: [Tag!]!
        meta: JSON
    }

    type Tag { title: String }

    union SearchResult = Article | Author

    input ArticleFilter { status: Status, authors: [ID!] }

    type Query {
        article(id: ID!): Article
        articles(filter: ArticleFilter, limit: Int = 10): [Article!]!
        search(text: String!): [SearchResult!]!
        node(id: ID!): Node
    }

    type Mutation { publish(id: ID!): Article }

    type Subscription { published: Article }
    "#;
